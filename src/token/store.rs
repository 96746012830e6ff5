//! Persistence for the gateway token and its issue time.
//!
//! The token shares the session state file under its own key:
//!
//! ```json
//! { "ten-gateway-token": { "token": "…", "issuedAtMs": 1700000000000 } }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::session::store::{FileStore, StoreError};

/// A gateway token with its wall-clock issue time in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub token: String,
    pub issued_at_ms: u64,
}

/// Persistence seam for the gateway token.
pub trait TokenStore: Send + Sync {
    fn load_token(&self) -> Result<Option<StoredToken>, StoreError>;

    /// Persist `token`; `None` clears the entry.
    fn save_token(&self, token: Option<&StoredToken>) -> Result<(), StoreError>;
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<StoredToken>>,
}

impl TokenStore for MemoryTokenStore {
    fn load_token(&self) -> Result<Option<StoredToken>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save_token(&self, token: Option<&StoredToken>) -> Result<(), StoreError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = token.cloned();
        Ok(())
    }
}

impl TokenStore for FileStore {
    fn load_token(&self) -> Result<Option<StoredToken>, StoreError> {
        self.load_entry()
    }

    fn save_token(&self, token: Option<&StoredToken>) -> Result<(), StoreError> {
        self.save_entry(token)
    }
}
