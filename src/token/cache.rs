//! Cached gateway bearer token with 24-hour rotation.
//!
//! # Rules
//! - No token: fetch one (bounded retries, linear delay)
//! - Token older than the max age: fetch a replacement, revoke the old one
//!   best-effort
//! - Replacement fetch failed: keep serving the expired token with a warning
//! - No token and the fetch failed: error
//!
//! The token and its wall-clock issue time go through a [`TokenStore`], so a
//! file-backed cache keeps reusing one token across process restarts.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::sleep;
use url::Url;

use crate::config::schema::TokenConfig;
use crate::token::endpoint::{parse_base, HttpTokenEndpoint, TokenEndpoint, TokenError};
use crate::token::store::{MemoryTokenStore, StoredToken, TokenStore};

type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Gateway token cache over a pluggable store.
pub struct TokenCache {
    endpoint: Arc<dyn TokenEndpoint>,
    config: TokenConfig,
    store: Arc<dyn TokenStore>,
    clock: Clock,
    current: Mutex<Option<StoredToken>>,
}

impl TokenCache {
    /// Cache that keeps the token in memory only.
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, config: TokenConfig) -> Self {
        Self::with_store(endpoint, config, Arc::new(MemoryTokenStore::default()))
    }

    pub fn with_store(
        endpoint: Arc<dyn TokenEndpoint>,
        config: TokenConfig,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            endpoint,
            config,
            store,
            clock: Arc::new(SystemTime::now),
            current: Mutex::new(None),
        }
    }

    /// Cache backed by the configured HTTP gateway and `store`.
    pub fn from_config(
        config: TokenConfig,
        timeout_secs: u64,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, TokenError> {
        let endpoint = HttpTokenEndpoint::new(&config.base_url, timeout_secs)?;
        Ok(Self::with_store(Arc::new(endpoint), config, store))
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.config.max_age_secs)
    }

    fn now_ms(&self) -> u64 {
        (self.clock)()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn is_expired(&self, stored: &StoredToken) -> bool {
        let age = Duration::from_millis(self.now_ms().saturating_sub(stored.issued_at_ms));
        age > self.max_age()
    }

    fn load_persisted(&self) -> Option<StoredToken> {
        match self.store.load_token() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable stored gateway token");
                None
            }
        }
    }

    fn remember(&self, current: &mut Option<StoredToken>, token: &str) {
        let stored = StoredToken {
            token: token.to_string(),
            issued_at_ms: self.now_ms(),
        };
        if let Err(e) = self.store.save_token(Some(&stored)) {
            tracing::warn!(error = %e, "Failed to persist gateway token");
        }
        *current = Some(stored);
    }

    /// Return a usable token, fetching or rotating as needed.
    pub async fn token(&self) -> Result<String, TokenError> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = self.load_persisted();
        }

        let Some(stored) = current.clone() else {
            let token = self.fetch().await.map_err(|e| {
                tracing::error!(error = %e, "Unable to fetch initial gateway token");
                e
            })?;
            self.remember(&mut current, &token);
            return Ok(token);
        };

        if !self.is_expired(&stored) {
            return Ok(stored.token);
        }

        tracing::info!("Gateway token expired, fetching a new one");
        match self.fetch().await {
            Ok(token) => {
                if let Err(e) = self.endpoint.revoke(&stored.token).await {
                    tracing::warn!(error = %e, "Failed to revoke old gateway token");
                }
                self.remember(&mut current, &token);
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, using expired token");
                Ok(stored.token)
            }
        }
    }

    /// Authorised JSON-RPC URL (`{base}?token=…`).
    pub async fn rpc_url(&self) -> Result<Url, TokenError> {
        let token = self.token().await?;
        with_token(&self.config.base_url, &token)
    }

    /// Authorised WebSocket URL (`{ws_base}?token=…`).
    pub async fn ws_url(&self) -> Result<Url, TokenError> {
        let token = self.token().await?;
        with_token(&self.config.ws_url, &token)
    }

    async fn fetch(&self) -> Result<String, TokenError> {
        let attempts = self.config.fetch_attempts.max(1);
        let mut last = TokenError::Empty;

        for attempt in 1..=attempts {
            match self.endpoint.join().await {
                Ok(token) => {
                    tracing::info!(attempt = attempt, attempts = attempts, "Fetched gateway token");
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt, attempts = attempts, error = %e, "Token fetch failed");
                    last = e;
                }
            }
            if attempt < attempts {
                sleep(Duration::from_millis(self.config.retry_delay_ms) * attempt).await;
            }
        }

        Err(TokenError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }
}

fn with_token(base_url: &str, token: &str) -> Result<Url, TokenError> {
    let mut url = parse_base(base_url)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
