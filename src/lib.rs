//! TEN session-key engine.
//!
//! Provision, fund, use, drain and destroy gateway-held session keys on the
//! TEN network through an EIP-1193 wallet provider.

pub mod blockchain;
pub mod config;
pub mod observability;
pub mod session;
pub mod token;

pub use blockchain::{Eip1193Provider, HttpProvider, TransactionIntent, Urgency};
pub use config::TenConfig;
pub use session::{SessionError, SessionKeyEngine, SessionState};
pub use token::TokenCache;
