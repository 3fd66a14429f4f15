use alloy::primitives::TxHash;
use thiserror::Error;

/// Failures surfaced by the state engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid number of inputs for '{method}': expected {expected}, found {found}")]
    InvalidParameterCount {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid contract method or parameters: {0}")]
    InvalidMethod(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("could not find transaction receipt for {tx_hash} after {attempts} attempts")]
    ReceiptTimeout { tx_hash: TxHash, attempts: u32 },

    #[error("invalid deployment descriptor: {0}")]
    InvalidDeploymentDescriptor(String),

    #[error("member '{0}' has not been made async-capable")]
    NotAsyncCapable(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
