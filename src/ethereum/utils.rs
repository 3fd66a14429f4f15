use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Length of a `0x`-prefixed account identifier.
pub const ADDRESS_LENGTH: usize = 42;

/// Validates an account identifier: `0x` followed by exactly 40 hex digits.
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(anyhow!("address '{}' must start with '0x'", address));
    }

    if address.len() != ADDRESS_LENGTH {
        return Err(anyhow!(
            "address '{}' must be exactly {} characters long",
            address,
            ADDRESS_LENGTH
        ));
    }

    if !address[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "address '{}' contains non-hexadecimal characters",
            address
        ));
    }

    Address::from_str(address).map_err(|e| anyhow!("invalid address '{}': {}", address, e))
}

/// Validates network name against the configured networks.
pub fn validate_network(network: &str, available_networks: &[String]) -> Result<()> {
    if network.is_empty() {
        return Err(anyhow!("Network name cannot be empty"));
    }

    if !available_networks.iter().any(|n| n == network) {
        return Err(anyhow!(
            "Unknown network: '{}'. Available networks: {}",
            network,
            available_networks.join(", ")
        ));
    }

    Ok(())
}

/// Parses a wei amount given in decimal or `0x` hex.
pub fn parse_wei(value_str: &str) -> Result<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(anyhow!("Value cannot be empty"));
    }

    match value_str
        .strip_prefix("0x")
        .or_else(|| value_str.strip_prefix("0X"))
    {
        Some(hex_part) => U256::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid hexadecimal value: '{}'", value_str)),
        None => U256::from_str(value_str).map_err(|_| {
            anyhow!(
                "Invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                value_str
            )
        }),
    }
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("execution reverted") {
        "the contract reverted execution; its requirements were not met".to_string()
    } else if error.contains("insufficient funds") {
        "insufficient funds to cover value and gas".to_string()
    } else if error.contains("gas required exceeds allowance") {
        "gas limit too low for this transaction".to_string()
    } else if error.contains("nonce too low") {
        "nonce too low; another transaction from this account was already mined with it"
            .to_string()
    } else if error.contains("replacement transaction underpriced") {
        "gas price too low to replace the pending transaction with the same nonce".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "cannot connect to the RPC endpoint".to_string()
    } else if error.contains("timeout") {
        "request to the RPC endpoint timed out".to_string()
    } else if error.contains("rate limit") {
        "rate limited by the RPC endpoint".to_string()
    } else if error.contains("method not found") {
        "the RPC endpoint does not support this method".to_string()
    } else {
        format!("RPC error: {}", error)
    }
}

/// Creates user-friendly error messages for ABI resolution errors
pub fn interpret_abi_error(error: &str, contract_address: &str) -> String {
    if error.contains("not verified") || error.contains("404") {
        format!(
            "the contract at {} is not verified; supply its interface with --abi",
            contract_address
        )
    } else if error.contains("rate limit") || error.contains("429") {
        "explorer API rate limit hit; set ETHERSCAN_API_KEY or retry later".to_string()
    } else if error.contains("invalid API key") || error.contains("403") {
        "explorer API rejected the key in ETHERSCAN_API_KEY".to_string()
    } else {
        format!("ABI resolution error: {}", error)
    }
}
