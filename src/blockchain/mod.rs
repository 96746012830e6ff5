//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionIntent
//!     → fees.rs (fee history → FeeQuote)
//!     → encoding.rs (type-2 RLP bytes → base64)
//!     → rpc.rs (typed calls over the EIP-1193 provider in client.rs)
//!     → confirmation.rs (receipt polling)
//! ```
//!
//! # Constraints
//! - No private keys: the gateway signs with the session key
//! - Every provider call goes through `TenRpc`, so the `eth_getStorageAt`
//!   overloading stays in one place

pub mod client;
pub mod confirmation;
pub mod encoding;
pub mod fees;
pub mod rpc;
pub mod types;

pub use client::{Eip1193Provider, HttpProvider, ProviderEvent};
pub use confirmation::{await_receipt, PollPolicy};
pub use encoding::{EncodedTransaction, RawTransaction, TransactionIntent};
pub use fees::{FeeEstimator, FeeQuote, Urgency};
pub use rpc::TenRpc;
pub use types::{EncodingError, PollError, RpcError};
