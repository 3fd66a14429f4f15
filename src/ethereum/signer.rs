use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::Bytes,
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::str::FromStr;

use super::RawTransaction;

/// Produces the serialized, signed form of a raw transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, tx: &RawTransaction, private_key: &str) -> Result<Bytes>;
}

/// Signs locally with a secp256k1 key given as hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalKeySigner;

pub fn parse_private_key(private_key: &str) -> Result<PrivateKeySigner> {
    let key = private_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    PrivateKeySigner::from_str(key).map_err(|e| anyhow!("Invalid private key: {}", e))
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    async fn sign(&self, tx: &RawTransaction, private_key: &str) -> Result<Bytes> {
        let signer = parse_private_key(private_key)?;
        if signer.address() != tx.from {
            tracing::warn!(
                "Signing key address {:?} differs from transaction sender {:?}",
                signer.address(),
                tx.from
            );
        }

        let mut request = TransactionRequest::default()
            .with_from(tx.from)
            .with_value(tx.value)
            .with_input(tx.data.clone())
            .with_gas_limit(tx.gas_limit)
            .with_nonce(tx.nonce)
            .with_gas_price(tx.gas_price);
        request = match tx.to {
            Some(to) => request.with_to(to),
            None => request.into_create(),
        };
        if let Some(chain_id) = tx.chain_id {
            request = request.with_chain_id(chain_id);
        }

        let wallet = EthereumWallet::from(signer);
        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| anyhow!("Failed to sign transaction: {}", e))?;

        Ok(envelope.encoded_2718().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_parse_private_key_accepts_prefix() {
        let with_prefix = parse_private_key(KEY).unwrap();
        let without_prefix = parse_private_key(&KEY[2..]).unwrap();

        assert_eq!(with_prefix.address(), without_prefix.address());
        assert!(parse_private_key("zz").is_err());
    }

    #[tokio::test]
    async fn test_local_signer_produces_legacy_envelope() {
        let from = parse_private_key(KEY).unwrap().address();
        let tx = RawTransaction {
            from,
            to: Some(Address::repeat_byte(0x42)),
            value: U256::ZERO,
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            gas_limit: 100_000,
            nonce: 3,
            gas_price: 1_000_000_000,
            chain_id: Some(1),
        };

        let signed = LocalKeySigner.sign(&tx, KEY).await.unwrap();

        // Legacy transactions are RLP lists with no type prefix.
        assert!(signed[0] >= 0xc0);
    }
}
