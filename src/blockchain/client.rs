//! Provider boundary and HTTP JSON-RPC client.
//!
//! # Responsibilities
//! - Define the EIP-1193-shaped `request(method, params)` seam the engine
//!   talks through
//! - Deliver `accountsChanged` / `chainChanged` notifications when the
//!   underlying wallet supports them
//! - Forward raw calls to an alloy HTTP provider with per-call timeouts

use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::{RpcError as TransportRpcError, TransportError};
use async_trait::async_trait;
use serde_json::value::RawValue;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::blockchain::types::{RpcError, RpcResult};

/// Wallet-side notifications that invalidate an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged,
    ChainChanged,
}

/// An EIP-1193-style request object.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Issue a single JSON-RPC call and return its `result` member.
    async fn request(&self, method: &str, params: Value) -> RpcResult<Value>;

    /// Subscribe to wallet notifications, if the provider emits any.
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportRpcError::ErrorResp(payload) => Self::Response {
                code: payload.code,
                message: payload.message.to_string(),
            },
            other => Self::Transport(other.to_string()),
        }
    }
}

/// JSON-RPC client over HTTP backed by an alloy provider.
///
/// Session-key calls are non-standard (`eth_getStorageAt` overloading), so
/// every request goes through `raw_request_dyn` rather than typed methods.
pub struct HttpProvider {
    inner: Arc<dyn Provider + Send + Sync>,
    url: url::Url,
    timeout_duration: Duration,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpProvider {
    /// Create a provider for `url` with the given per-request timeout.
    pub fn new(url: &str, timeout_secs: u64) -> RpcResult<Self> {
        let url: url::Url = url
            .parse()
            .map_err(|e| RpcError::Transport(format!("Invalid RPC URL '{}': {}", url, e)))?;
        let inner = Arc::new(ProviderBuilder::new().connect_http(url.clone()))
            as Arc<dyn Provider + Send + Sync>;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            inner,
            url,
            timeout_duration: Duration::from_secs(timeout_secs),
            events,
        })
    }

    /// Forward a wallet notification to subscribers.
    ///
    /// Plain HTTP endpoints never emit these; embedding applications that
    /// learn about account or chain switches out of band can inject them.
    pub fn notify(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        let params = serde_json::value::to_raw_value(&params)
            .map_err(|e| RpcError::Transport(format!("Failed to serialize params: {}", e)))?;
        let raw: Box<RawValue> = self
            .inner
            .raw_request_dyn(Cow::Owned(method.to_string()), &params)
            .await?;
        serde_json::from_str(raw.get()).map_err(|e| RpcError::malformed(method, e.to_string()))
    }
}

#[async_trait]
impl Eip1193Provider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> RpcResult<Value> {
        match timeout(self.timeout_duration, self.call(method, params)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(method = method, error = %e, "RPC call failed");
                }
                result
            }
            Err(_) => {
                tracing::warn!(method = method, "RPC timeout");
                Err(RpcError::Timeout(self.timeout_duration.as_secs()))
            }
        }
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("url", &self.url.as_str())
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}
