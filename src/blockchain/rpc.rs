//! Typed RPC calls used by the session-key engine.
//!
//! The TEN gateway exposes session-key management by overloading
//! `eth_getStorageAt`: the "contract address" selects the operation and the
//! "slot" argument carries a JSON document. That convention is confined to the
//! `session_key_*` methods below.

use alloy::hex;
use alloy::primitives::{address, Address, Bytes, TxHash, U256, U64};
use alloy::rpc::types::{FeeHistory, TransactionReceipt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::blockchain::client::{Eip1193Provider, ProviderEvent};
use crate::blockchain::types::{RpcError, RpcResult};

/// Well-known target that provisions a session key.
pub const SESSION_KEY_CREATE: Address = address!("0000000000000000000000000000000000000003");
/// Well-known target that destroys a session key.
pub const SESSION_KEY_DELETE: Address = address!("0000000000000000000000000000000000000004");
/// Well-known target that signs and relays a transaction with a session key.
pub const SESSION_KEY_EXECUTE: Address = address!("0000000000000000000000000000000000000005");

/// Parameters for `eth_estimateGas` and `eth_sendTransaction`.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub value: Option<U256>,
    pub data: Option<Bytes>,
}

impl CallRequest {
    fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("to".into(), json!(hex::encode_prefixed(self.to)));
        obj.insert(
            "value".into(),
            json!(format!("{:#x}", self.value.unwrap_or_default())),
        );
        if let Some(data) = &self.data {
            obj.insert("data".into(), json!(hex::encode_prefixed(data)));
        }
        if let Some(from) = self.from {
            obj.insert("from".into(), json!(hex::encode_prefixed(from)));
        }
        Value::Object(obj)
    }
}

/// Typed facade over an [`Eip1193Provider`].
#[derive(Clone)]
pub struct TenRpc {
    provider: Arc<dyn Eip1193Provider>,
}

impl TenRpc {
    pub fn new(provider: Arc<dyn Eip1193Provider>) -> Self {
        Self { provider }
    }

    pub fn events(&self) -> Option<tokio::sync::broadcast::Receiver<ProviderEvent>> {
        self.provider.events()
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<T> {
        let value = self.provider.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::malformed(method, e.to_string()))
    }

    /// `eth_chainId`.
    pub async fn chain_id(&self) -> RpcResult<u64> {
        let id: U64 = self.call("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    /// `eth_blockNumber`.
    pub async fn block_number(&self) -> RpcResult<u64> {
        let n: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }

    /// `eth_getTransactionCount` at an explicit block height.
    pub async fn transaction_count(&self, address: Address, block: u64) -> RpcResult<u64> {
        let n: U64 = self
            .call(
                "eth_getTransactionCount",
                json!([hex::encode_prefixed(address), format!("{:#x}", block)]),
            )
            .await?;
        Ok(n.to::<u64>())
    }

    /// `eth_feeHistory` over the last `blocks` blocks.
    pub async fn fee_history(&self, blocks: u64, percentiles: &[f64]) -> RpcResult<FeeHistory> {
        self.call(
            "eth_feeHistory",
            json!([format!("{:#x}", blocks), "latest", percentiles]),
        )
        .await
    }

    /// `eth_estimateGas`.
    pub async fn estimate_gas(&self, request: &CallRequest) -> RpcResult<u64> {
        let n: U64 = self.call("eth_estimateGas", json!([request.to_json()])).await?;
        Ok(n.to::<u64>())
    }

    /// `eth_getBalance` against the `pending` tag.
    pub async fn pending_balance(&self, address: Address) -> RpcResult<U256> {
        self.call(
            "eth_getBalance",
            json!([hex::encode_prefixed(address), "pending"]),
        )
        .await
    }

    /// `eth_getTransactionReceipt`; `None` while the transaction is pending.
    pub async fn transaction_receipt(&self, tx_hash: TxHash) -> RpcResult<Option<TransactionReceipt>> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    /// `eth_sendTransaction` through the wallet behind the provider.
    pub async fn send_transaction(&self, request: &CallRequest) -> RpcResult<TxHash> {
        self.call("eth_sendTransaction", json!([request.to_json()]))
            .await
    }

    /// Ask the gateway to provision a session key and return its address.
    pub async fn session_key_create(&self) -> RpcResult<Address> {
        let method = "eth_getStorageAt";
        let raw: String = self
            .call(
                method,
                json!([hex::encode_prefixed(SESSION_KEY_CREATE), "0x0", "latest"]),
            )
            .await?;
        parse_low_address(&raw).ok_or_else(|| {
            RpcError::malformed(method, format!("no session key address in '{}'", raw))
        })
    }

    /// Destroy the given session key.
    pub async fn session_key_delete(&self, session_key: Address) -> RpcResult<()> {
        let payload = json!({ "sessionKeyAddress": hex::encode_prefixed(session_key) });
        self.provider
            .request(
                "eth_getStorageAt",
                json!([
                    hex::encode_prefixed(SESSION_KEY_DELETE),
                    payload.to_string(),
                    "latest"
                ]),
            )
            .await?;
        Ok(())
    }

    /// Destroy whatever session key the gateway holds for this account.
    pub async fn session_key_cleanup(&self) -> RpcResult<()> {
        self.provider
            .request(
                "eth_getStorageAt",
                json!([hex::encode_prefixed(SESSION_KEY_DELETE), "0x0", "latest"]),
            )
            .await?;
        Ok(())
    }

    /// Have the gateway sign `raw_tx_base64` with the session key and relay it.
    pub async fn session_key_execute(
        &self,
        session_key: Address,
        raw_tx_base64: &str,
    ) -> RpcResult<TxHash> {
        let payload = json!({
            "sessionKeyAddress": hex::encode_prefixed(session_key),
            "tx": raw_tx_base64,
        });
        self.call(
            "eth_getStorageAt",
            json!([
                hex::encode_prefixed(SESSION_KEY_EXECUTE),
                payload.to_string(),
                "latest"
            ]),
        )
        .await
    }
}

impl std::fmt::Debug for TenRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenRpc").finish_non_exhaustive()
    }
}

/// Take the low 20 bytes of a hex word as an address.
fn parse_low_address(raw: &str) -> Option<Address> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.len() < 40 {
        return None;
    }
    let low = digits.get(digits.len() - 40..)?;
    let bytes = hex::decode(low).ok()?;
    Address::try_from(bytes.as_slice()).ok()
}
