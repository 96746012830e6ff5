//! RPC-level types and error definitions.

use alloy::primitives::TxHash;
use thiserror::Error;

/// Errors raised at the provider boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// Transport failed (connection refused, HTTP status, timeout).
    #[error("RPC transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Response { code: i64, message: String },

    /// The call succeeded but the result had an unexpected shape.
    #[error("Malformed RPC result for {method}: {reason}")]
    Malformed { method: String, reason: String },

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),
}

impl RpcError {
    pub fn malformed(method: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for provider calls.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors produced while building or parsing the raw transaction bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// A field the caller must supply was absent.
    #[error("Missing required transaction field: {0}")]
    MissingField(&'static str),

    /// Fee pair violates max fee >= priority fee.
    #[error("maxFeePerGas {max_fee} is below maxPriorityFeePerGas {priority_fee}")]
    InvalidFees { max_fee: u128, priority_fee: u128 },

    /// Raw bytes did not start with the type-2 prefix.
    #[error("Unsupported transaction type byte: {0:#04x}")]
    UnsupportedType(u8),

    /// RLP structure could not be produced or parsed.
    #[error("RLP error: {0}")]
    Rlp(String),
}

impl From<alloy_rlp::Error> for EncodingError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Rlp(err.to_string())
    }
}

/// Terminal outcomes of receipt polling other than success.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    /// No receipt appeared within the attempt budget.
    #[error("Transaction {tx_hash} not confirmed after {attempts} attempts")]
    Timeout { tx_hash: TxHash, attempts: u32 },

    /// Receipt present with failure status.
    #[error("Transaction {tx_hash} reverted on-chain")]
    Reverted {
        tx_hash: TxHash,
        block_number: Option<u64>,
    },
}
