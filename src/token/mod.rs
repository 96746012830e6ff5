//! Gateway bearer tokens for authorised RPC access.

pub mod cache;
pub mod endpoint;
pub mod store;

pub use cache::TokenCache;
pub use endpoint::{HttpTokenEndpoint, TokenEndpoint, TokenError};
pub use store::{MemoryTokenStore, StoredToken, TokenStore};
