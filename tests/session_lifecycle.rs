//! Session key creation, funding, transactions and balance refresh.

mod common;

use alloy::hex;
use alloy::primitives::{Bytes, U256};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use common::*;
use ten_session_keys::blockchain::{ProviderEvent, RpcError, TransactionIntent};
use ten_session_keys::session::{
    MemoryStore, PreconditionError, SessionError, SessionEvent, SessionKeyEngine, SessionStore,
};

#[tokio::test]
async fn test_create_reuses_persisted_key() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let store = Arc::new(MemoryStore::new());

    let engine = engine_with(&mock, store.clone());
    assert_eq!(engine.create_session_key().await.unwrap(), SESSION_KEY);
    assert_eq!(store.load().unwrap(), Some(SESSION_KEY));
    assert!(engine.state().is_active);

    assert_eq!(engine.create_session_key().await.unwrap(), SESSION_KEY);

    // A fresh engine over the same store must not provision again.
    let restarted = engine_with(&mock, store);
    assert_eq!(restarted.create_session_key().await.unwrap(), SESSION_KEY);
    assert_eq!(mock.call_count(&create_method()), 1);
}

#[tokio::test]
async fn test_create_rejects_wrong_network() {
    let mock = MockProvider::happy_path(U256::ZERO);
    mock.respond("eth_chainId", hex_u64(1));
    let engine = engine_with(&mock, Arc::new(MemoryStore::new()));

    let err = engine.create_session_key().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::from(PreconditionError::WrongNetwork {
            expected: CHAIN_ID,
            actual: 1
        })
    );
    assert_eq!(mock.call_count(&create_method()), 0);

    let state = engine.state();
    assert_eq!(state.error, Some(err));
    assert_eq!(state.session_key, None);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_create_failure_stores_nothing() {
    let mock = MockProvider::new();
    mock.fail(&create_method(), RpcError::Response {
        code: -32000,
        message: "gateway unavailable".into(),
    });
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(&mock, store.clone());

    let err = engine.create_session_key().await.unwrap_err();
    assert!(matches!(err, SessionError::Creation(_)));
    assert!(err.to_string().starts_with("Session key creation failed"));
    assert_eq!(store.load().unwrap(), None);
    assert_eq!(engine.state().session_key, None);
}

#[tokio::test]
async fn test_create_tolerates_balance_failure() {
    let mock = MockProvider::happy_path(U256::ZERO);
    mock.fail("eth_getBalance", RpcError::Timeout(10));
    let engine = engine_with(&mock, Arc::new(MemoryStore::new()));

    assert_eq!(engine.create_session_key().await.unwrap(), SESSION_KEY);
    let state = engine.state();
    assert_eq!(state.balance, None);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_send_derives_nonce_from_direct_endpoint() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let direct = MockProvider::new();
    direct.respond("eth_blockNumber", hex_u64(0x200));

    let engine = engine_with_key(&mock).with_direct_provider(direct.clone());
    let tx_hash = engine
        .send_transaction(TransactionIntent::transfer(RECIPIENT, eth("0.01")))
        .await
        .unwrap();
    assert_eq!(tx_hash, TX_HASH);

    assert_eq!(direct.call_count("eth_blockNumber"), 1);
    assert_eq!(mock.call_count("eth_blockNumber"), 0);
    assert_eq!(
        mock.calls("eth_getTransactionCount")[0],
        json!([hex::encode_prefixed(SESSION_KEY), "0x200"])
    );

    let estimate = &mock.calls("eth_estimateGas")[0][0];
    assert_eq!(estimate["from"], json!(hex::encode_prefixed(SESSION_KEY)));
    assert_eq!(estimate["to"], json!(hex::encode_prefixed(RECIPIENT)));
    assert_eq!(estimate["value"], hex_u256(eth("0.01")));

    let tx = executed_transaction(&mock, 0);
    assert_eq!(tx.chain_id, CHAIN_ID);
    assert_eq!(tx.nonce, 7);
    assert_eq!(tx.gas_limit, 21_000);
    assert_eq!(tx.to, RECIPIENT);
    assert_eq!(tx.value, eth("0.01"));
    assert!(tx.data.is_empty());
    // No fee history scripted: medium fallback of 1 gwei base + 2 gwei priority.
    assert_eq!(tx.max_priority_fee_per_gas, 2_000_000_000);
    assert_eq!(tx.max_fee_per_gas, 3_000_000_000);
}

#[tokio::test]
async fn test_nonce_falls_back_to_provider_block() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let direct = MockProvider::new();

    let engine = engine_with_key(&mock).with_direct_provider(direct);
    engine
        .send_transaction(TransactionIntent::transfer(RECIPIENT, U256::from(1)))
        .await
        .unwrap();

    assert_eq!(mock.call_count("eth_blockNumber"), 1);
    assert_eq!(mock.calls("eth_getTransactionCount")[0][1], json!("0x64"));
}

#[tokio::test]
async fn test_send_uses_fee_history() {
    let mock = MockProvider::happy_path(U256::ZERO);
    mock.respond(
        "eth_feeHistory",
        json!({
            "oldestBlock": "0x1",
            "baseFeePerGas": ["0x5a", "0x64"],
            "gasUsedRatio": [0.5, 0.5, 0.5],
            "reward": [["0x1", "0x5", "0x9"], ["0x2", "0x5", "0x9"], ["0x1", "0x6", "0x9"]],
        }),
    );
    let engine = engine_with_key(&mock);

    engine
        .send_transaction(TransactionIntent::transfer(RECIPIENT, U256::from(1)))
        .await
        .unwrap();

    let tx = executed_transaction(&mock, 0);
    assert_eq!(tx.max_fee_per_gas, 125);
    assert_eq!(tx.max_priority_fee_per_gas, 5);
}

#[tokio::test]
async fn test_explicit_parameters_skip_lookups() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with_key(&mock);

    let intent = TransactionIntent {
        to: Some(RECIPIENT),
        value: None,
        data: Some(Bytes::from_static(&[0xde, 0xad])),
        nonce: Some(42),
        gas_limit: Some(50_000),
        max_fee_per_gas: Some(30),
        max_priority_fee_per_gas: Some(3),
    };
    engine.send_transaction(intent).await.unwrap();

    for method in [
        "eth_blockNumber",
        "eth_getTransactionCount",
        "eth_estimateGas",
        "eth_feeHistory",
    ] {
        assert_eq!(mock.call_count(method), 0, "{} should not be called", method);
    }

    let tx = executed_transaction(&mock, 0);
    assert_eq!(tx.nonce, 42);
    assert_eq!(tx.gas_limit, 50_000);
    assert_eq!((tx.max_fee_per_gas, tx.max_priority_fee_per_gas), (30, 3));
    assert_eq!(tx.value, U256::ZERO);
    assert_eq!(tx.data.to_vec(), vec![0xde, 0xad]);
}

#[tokio::test]
async fn test_send_rejects_inverted_fees() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with_key(&mock);

    let intent = TransactionIntent {
        max_fee_per_gas: Some(1),
        max_priority_fee_per_gas: Some(2),
        ..TransactionIntent::transfer(RECIPIENT, U256::from(1))
    };
    let err = engine.send_transaction(intent).await.unwrap_err();
    assert!(matches!(err, SessionError::Encoding(_)));
    assert_eq!(mock.call_count(&execute_method()), 0);
}

#[tokio::test]
async fn test_send_requires_session_key() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with(&mock, Arc::new(MemoryStore::new()));

    let err = engine
        .send_transaction(TransactionIntent::transfer(RECIPIENT, U256::from(1)))
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::from(PreconditionError::NoSessionKey));
}

#[tokio::test(start_paused = true)]
async fn test_fund_waits_for_receipt_and_refreshes() {
    let mock = MockProvider::happy_path(eth("0.5"));
    mock.push("eth_getTransactionReceipt", Ok(json!(null)));
    let engine = engine_with_key(&mock);

    let tx_hash = engine.fund_session_key("0.1", WALLET).await.unwrap();
    assert_eq!(tx_hash, TX_HASH);

    let request = &mock.calls("eth_sendTransaction")[0][0];
    assert_eq!(request["to"], json!(hex::encode_prefixed(SESSION_KEY)));
    assert_eq!(request["from"], json!(hex::encode_prefixed(WALLET)));
    assert_eq!(request["value"], hex_u256(eth("0.1")));
    assert_eq!(mock.call_count("eth_getTransactionReceipt"), 2);

    let balance = engine.state().balance.unwrap();
    assert_eq!(balance.wei, eth("0.5"));
}

#[tokio::test]
async fn test_fund_rejects_zero_amount() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with_key(&mock);

    let err = engine.fund_session_key("0", WALLET).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Precondition(PreconditionError::InvalidAmount(_))
    ));
    assert_eq!(mock.call_count("eth_sendTransaction"), 0);
}

#[tokio::test]
async fn test_fund_rejects_amount_above_wallet_reserve() {
    let mock = MockProvider::happy_path(eth("0.05"));
    let engine = engine_with_key(&mock);

    let err = engine.fund_session_key("0.05", WALLET).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InsufficientFunds {
            available: eth("0.05"),
            required: eth("0.051"),
        }
    );
    assert_eq!(mock.calls("eth_getBalance")[0][0], json!(hex::encode_prefixed(WALLET)));
    assert_eq!(mock.call_count("eth_sendTransaction"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fund_times_out_after_funding_budget() {
    let mock = MockProvider::happy_path(eth("0.5"));
    mock.respond("eth_getTransactionReceipt", json!(null));
    let mut config = test_config();
    config.polling.max_attempts = 3;
    config.polling.funding_max_attempts = 5;
    let engine = SessionKeyEngine::new(
        mock.clone(),
        config,
        Arc::new(MemoryStore::with_key(SESSION_KEY)),
    )
    .unwrap();

    let started = Instant::now();
    let err = engine.fund_session_key("0.1", WALLET).await.unwrap_err();

    assert_eq!(
        err,
        SessionError::ConfirmationTimeout {
            tx_hash: TX_HASH,
            attempts: 5
        }
    );
    assert_eq!(mock.call_count("eth_getTransactionReceipt"), 5);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(8000));
    assert!(elapsed < Duration::from_millis(10000));

    let state = engine.state();
    assert_eq!(state.balance, None);
    assert_eq!(state.error, Some(err));
}

#[tokio::test]
async fn test_fund_revert_skips_balance_refresh() {
    let mock = MockProvider::happy_path(eth("0.5"));
    mock.respond("eth_getTransactionReceipt", receipt(0));
    let engine = engine_with_key(&mock);
    let mut events = engine.events();

    let err = engine.fund_session_key("0.1", WALLET).await.unwrap_err();
    assert_eq!(err, SessionError::OnChainRevert { tx_hash: TX_HASH });
    assert_eq!(mock.call_count("eth_getTransactionReceipt"), 1);

    // Only the wallet check read a balance; the session balance was not refreshed.
    assert_eq!(mock.call_count("eth_getBalance"), 1);
    assert_eq!(engine.state().balance, None);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SessionEvent::Funded { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_balance_refresh_is_single_flight() {
    let mock = MockProvider::happy_path(eth("0.021"));
    mock.delay("eth_getBalance", Duration::from_secs(1));
    let engine = engine_with_key(&mock);

    let (first, second) = tokio::join!(engine.update_balance(), engine.update_balance());
    let results = [first.unwrap(), second.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    assert_eq!(mock.call_count("eth_getBalance"), 1);

    let state = engine.state();
    assert!(!state.is_refreshing_balance);
    let balance = state.balance.unwrap();
    assert_eq!(balance.wei, eth("0.021"));
    // 0.021 ETH / (21000 gas × 3 gwei fallback max fee)
    assert_eq!(balance.estimated_transactions, 333);

    engine.update_balance().await.unwrap().unwrap();
    assert_eq!(mock.call_count("eth_getBalance"), 2);
}

#[tokio::test]
async fn test_wallet_change_deactivates_session() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with(&mock, Arc::new(MemoryStore::new()));
    let mut events = engine.events();

    engine.create_session_key().await.unwrap();
    assert!(engine.state().is_active);

    let mut state = engine.subscribe();
    mock.emit(ProviderEvent::ChainChanged);
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| !s.is_active))
        .await
        .expect("session not deactivated")
        .unwrap();

    let deactivated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionEvent::Deactivated(event)) = events.recv().await {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(deactivated, ProviderEvent::ChainChanged);
    // The key itself survives; only the active flag drops.
    assert_eq!(engine.state().session_key, Some(SESSION_KEY));
}

#[tokio::test]
async fn test_recreated_key_gets_event_watcher() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with(&mock, Arc::new(MemoryStore::new()));

    engine.create_session_key().await.unwrap();
    engine.delete_session_key().await.unwrap();
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    engine.create_session_key().await.unwrap();
    assert!(engine.state().is_active);

    let mut state = engine.subscribe();
    mock.emit(ProviderEvent::AccountsChanged);
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| !s.is_active))
        .await
        .expect("recreated session not deactivated")
        .unwrap();
}

#[tokio::test]
async fn test_delete_clears_key_without_withdrawing() {
    let mock = MockProvider::happy_path(eth("1"));
    let store = Arc::new(MemoryStore::with_key(SESSION_KEY));
    let engine = engine_with(&mock, store.clone());

    engine.delete_session_key().await.unwrap();

    let params = &mock.calls(&delete_method())[0];
    let payload: serde_json::Value = serde_json::from_str(params[1].as_str().unwrap()).unwrap();
    assert_eq!(
        payload["sessionKeyAddress"],
        json!(hex::encode_prefixed(SESSION_KEY))
    );
    assert_eq!(params[2], json!("latest"));
    assert_eq!(mock.call_count(&execute_method()), 0);

    let state = engine.state();
    assert_eq!(state.session_key, None);
    assert!(!state.is_active);
    assert_eq!(state.balance, None);
    assert_eq!(store.load().unwrap(), None);
}

#[tokio::test]
async fn test_cleanup_without_local_key() {
    let mock = MockProvider::happy_path(U256::ZERO);
    let engine = engine_with(&mock, Arc::new(MemoryStore::new()));

    engine.cleanup_session_key().await.unwrap();
    assert_eq!(mock.calls(&delete_method())[0][1], json!("0x0"));
    assert_eq!(engine.state().session_key, None);
}
