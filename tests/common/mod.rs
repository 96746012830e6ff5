//! Shared utilities for integration tests.

#![allow(dead_code)]

use alloy::hex;
use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use ten_session_keys::blockchain::encoding::{self, EncodedTransaction};
use ten_session_keys::blockchain::rpc::{SESSION_KEY_CREATE, SESSION_KEY_DELETE, SESSION_KEY_EXECUTE};
use ten_session_keys::blockchain::types::{RpcError, RpcResult};
use ten_session_keys::blockchain::{Eip1193Provider, ProviderEvent};
use ten_session_keys::config::TenConfig;
use ten_session_keys::session::{MemoryStore, SessionKeyEngine, SessionStore};

pub const CHAIN_ID: u64 = 8443;
pub const SESSION_KEY: Address = Address::repeat_byte(0x5e);
pub const WALLET: Address = Address::repeat_byte(0xaa);
pub const RECIPIENT: Address = Address::repeat_byte(0xbb);
pub const TX_HASH: TxHash = TxHash::repeat_byte(0x77);

/// Routing key for an `eth_getStorageAt` call against `target`.
pub fn storage_at(target: Address) -> String {
    format!("eth_getStorageAt:{}", hex::encode_prefixed(target))
}

pub fn create_method() -> String {
    storage_at(SESSION_KEY_CREATE)
}

pub fn delete_method() -> String {
    storage_at(SESSION_KEY_DELETE)
}

pub fn execute_method() -> String {
    storage_at(SESSION_KEY_EXECUTE)
}

pub fn hex_u64(n: u64) -> Value {
    json!(format!("{:#x}", n))
}

pub fn hex_u256(n: U256) -> Value {
    json!(format!("{:#x}", n))
}

/// A mined type-2 receipt as a node returns it.
pub fn receipt(status: u64) -> Value {
    json!({
        "transactionHash": TX_HASH,
        "transactionIndex": "0x0",
        "blockHash": TxHash::repeat_byte(0x10),
        "blockNumber": "0x10",
        "from": hex::encode_prefixed(SESSION_KEY),
        "to": hex::encode_prefixed(RECIPIENT),
        "cumulativeGasUsed": "0x5208",
        "gasUsed": "0x5208",
        "effectiveGasPrice": "0x3b9aca00",
        "contractAddress": null,
        "logs": [],
        "logsBloom": format!("0x{}", "0".repeat(512)),
        "type": "0x2",
        "status": format!("{:#x}", status),
    })
}

/// Scriptable EIP-1193 provider that records every request.
///
/// Responses are looked up by method name (`eth_getStorageAt` calls are keyed
/// by target address, see [`storage_at`]). Queued one-shot responses win over
/// the sticky response for the same method; unknown methods fail.
pub struct MockProvider {
    sticky: Mutex<HashMap<String, RpcResult<Value>>>,
    queued: Mutex<HashMap<String, VecDeque<RpcResult<Value>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockProvider {
    /// Provider on the TEN testnet chain with nothing else scripted.
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let mock = Self {
            sticky: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events,
        };
        mock.respond("eth_chainId", hex_u64(CHAIN_ID));
        Arc::new(mock)
    }

    /// Provider scripted for the happy path of every session operation.
    pub fn happy_path(balance: U256) -> Arc<Self> {
        let mock = Self::new();
        mock.respond(
            &create_method(),
            json!(format!("0x{:0>64}", hex::encode(SESSION_KEY))),
        );
        mock.respond(&delete_method(), json!("0x"));
        mock.respond(&execute_method(), json!(TX_HASH));
        mock.respond("eth_sendTransaction", json!(TX_HASH));
        mock.respond("eth_getBalance", hex_u256(balance));
        mock.respond("eth_blockNumber", hex_u64(100));
        mock.respond("eth_getTransactionCount", hex_u64(7));
        mock.respond("eth_estimateGas", hex_u64(21_000));
        mock.respond("eth_getTransactionReceipt", receipt(1));
        mock
    }

    pub fn respond(&self, method: &str, value: Value) {
        self.sticky.lock().unwrap().insert(method.to_string(), Ok(value));
    }

    pub fn fail(&self, method: &str, err: RpcError) {
        self.sticky.lock().unwrap().insert(method.to_string(), Err(err));
    }

    /// Queue a one-shot response consumed before the sticky one.
    pub fn push(&self, method: &str, result: RpcResult<Value>) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn delay(&self, method: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(method.to_string(), delay);
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    /// Params of every call routed to `method`, in order.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls(method).len()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }
}

#[async_trait]
impl Eip1193Provider for MockProvider {
    async fn request(&self, method: &str, params: Value) -> RpcResult<Value> {
        let key = match (method, params.get(0).and_then(Value::as_str)) {
            ("eth_getStorageAt", Some(target)) => format!("{}:{}", method, target),
            _ => method.to_string(),
        };
        self.calls.lock().unwrap().push((key.clone(), params));

        let delay = self.delays.lock().unwrap().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(result) = queued {
            return result;
        }

        self.sticky
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(RpcError::Transport(format!("no mock for {}", key))))
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

/// Config with a fast polling budget.
pub fn test_config() -> TenConfig {
    let mut config = TenConfig::default();
    config.polling.interval_ms = 2000;
    config.polling.max_attempts = 3;
    config.polling.funding_max_attempts = 3;
    config
}

pub fn engine_with(mock: &Arc<MockProvider>, store: Arc<dyn SessionStore>) -> SessionKeyEngine {
    SessionKeyEngine::new(mock.clone(), test_config(), store).unwrap()
}

/// Engine that already holds `SESSION_KEY`.
pub fn engine_with_key(mock: &Arc<MockProvider>) -> SessionKeyEngine {
    engine_with(mock, Arc::new(MemoryStore::with_key(SESSION_KEY)))
}

/// Decode the raw transaction carried by the `n`th execute call.
pub fn executed_transaction(mock: &MockProvider, n: usize) -> EncodedTransaction {
    let params = &mock.calls(&execute_method())[n];
    let payload: Value = serde_json::from_str(params[1].as_str().unwrap()).unwrap();
    assert_eq!(
        payload["sessionKeyAddress"].as_str().unwrap(),
        hex::encode_prefixed(SESSION_KEY)
    );
    let raw = STANDARD.decode(payload["tx"].as_str().unwrap()).unwrap();
    encoding::decode(&raw).unwrap()
}

pub fn eth(amount: &str) -> U256 {
    ten_session_keys::session::amounts::parse_eth(amount).unwrap()
}
