//! Session key management.
//!
//! # Data Flow
//! ```text
//! SessionKeyEngine
//!     → blockchain::TenRpc (gateway calls over the wallet provider)
//!     → store.rs (persisted key identifier)
//!     → state.rs (watch snapshot + broadcast events)
//! ```
//!
//! # Deletion saga
//! `confirm_delete_session` sweeps the key above the gas reserve, waits for
//! the withdrawal receipt and only then deletes the key. A failure at any
//! step parks the saga in `Error` with the key retained.

pub mod amounts;
pub mod engine;
pub mod error;
pub mod state;
pub mod store;

pub use engine::SessionKeyEngine;
pub use error::{PreconditionError, SessionError, SessionResult};
pub use state::{DeletionState, SessionBalance, SessionEvent, SessionState, WithdrawalOutcome};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
