//! Error taxonomy surfaced by the session-key engine.

use alloy::primitives::{TxHash, U256};
use thiserror::Error;

use crate::blockchain::types::{EncodingError, PollError, RpcError};
use crate::session::amounts::{format_eth, AmountError};
use crate::session::state::DeletionState;
use crate::session::store::StoreError;

/// User-actionable failures; never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Please switch to TEN network (chain ID {expected}); wallet is on chain {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("No active session key. Create a session key first.")]
    NoSessionKey,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Session deletion is {0}; reset it before starting another")]
    DeletionInProgress(DeletionState),
}

fn eth(wei: &U256) -> String {
    format_eth(*wei)
}

/// Errors returned by engine operations and stored in the session state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(
        "Insufficient balance. Available: {} ETH, Required: {} ETH (includes gas reserve)",
        eth(.available),
        eth(.required)
    )]
    InsufficientFunds { available: U256, required: U256 },

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Transaction {tx_hash} not confirmed after {attempts} attempts")]
    ConfirmationTimeout { tx_hash: TxHash, attempts: u32 },

    #[error("Transaction {tx_hash} reverted on-chain")]
    OnChainRevert { tx_hash: TxHash },

    #[error("Session key creation failed: {0}")]
    Creation(Box<SessionError>),

    #[error("Session store error: {0}")]
    Store(String),
}

impl SessionError {
    /// Wrap a failure that happened while provisioning a key.
    pub fn creation(err: impl Into<SessionError>) -> Self {
        Self::Creation(Box::new(err.into()))
    }
}

impl From<PollError> for SessionError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout { tx_hash, attempts } => {
                Self::ConfirmationTimeout { tx_hash, attempts }
            }
            PollError::Reverted { tx_hash, .. } => Self::OnChainRevert { tx_hash },
        }
    }
}

impl From<AmountError> for SessionError {
    fn from(err: AmountError) -> Self {
        match err {
            AmountError::ExceedsAvailable {
                available,
                required,
                ..
            } => Self::InsufficientFunds {
                available,
                required,
            },
            other => PreconditionError::InvalidAmount(other.to_string()).into(),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type for engine operations.
pub type SessionResult<T> = Result<T, SessionError>;
