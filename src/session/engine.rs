//! Session key lifecycle engine.
//!
//! # Responsibilities
//! - Provision, fund, use, drain and destroy a gateway-held session key
//! - Keep the [`SessionState`] aggregate current and publish [`SessionEvent`]s
//! - Run the withdraw-then-delete saga without ever deleting a funded key
//!
//! Operations are expected to be serialised by the caller; only balance
//! refreshes are guarded against re-entrancy.

use alloy::primitives::{Address, TxHash, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::blockchain::client::{Eip1193Provider, HttpProvider};
use crate::blockchain::confirmation::{await_receipt, PollPolicy};
use crate::blockchain::encoding::{self, TransactionIntent};
use crate::blockchain::fees::{FeeEstimator, FeeQuote, Urgency};
use crate::blockchain::rpc::{CallRequest, TenRpc};
use crate::blockchain::types::EncodingError;
use crate::config::schema::TenConfig;
use crate::observability::metrics;
use crate::session::amounts::{self, format_eth};
use crate::session::error::{PreconditionError, SessionError, SessionResult};
use crate::session::state::{
    DeletionState, SessionBalance, SessionEvent, SessionState, WithdrawalOutcome,
};
use crate::session::store::{FileStore, MemoryStore, SessionStore};

const EVENT_CAPACITY: usize = 64;

/// Clears the in-flight flag even if the refresh future is dropped.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Session key engine bound to one wallet provider.
pub struct SessionKeyEngine {
    rpc: TenRpc,
    /// Cache-bypassing endpoint used for the nonce block tag.
    direct: Option<TenRpc>,
    fees: FeeEstimator,
    config: TenConfig,
    store: Arc<dyn SessionStore>,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    refreshing: AtomicBool,
    /// Provider-event watcher for the current key; aborted when the key is forgotten.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionKeyEngine {
    /// Build an engine, restoring any persisted session key.
    pub fn new(
        provider: Arc<dyn Eip1193Provider>,
        config: TenConfig,
        store: Arc<dyn SessionStore>,
    ) -> SessionResult<Self> {
        let session_key = store.load()?;
        if let Some(key) = session_key {
            tracing::info!(session_key = %key, "Restored persisted session key");
        }

        let (state, _) = watch::channel(SessionState {
            session_key,
            ..Default::default()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            rpc: TenRpc::new(provider),
            direct: None,
            fees: FeeEstimator::new(config.fees.clone()),
            config,
            store,
            state: Arc::new(state),
            events,
            refreshing: AtomicBool::new(false),
            watcher: Mutex::new(None),
        })
    }

    /// Build an engine talking JSON-RPC over HTTP, as configured.
    pub fn connect(config: TenConfig) -> SessionResult<Self> {
        let timeout = config.network.rpc_timeout_secs;
        let provider = Arc::new(HttpProvider::new(&config.network.rpc_url, timeout)?);

        let store: Arc<dyn SessionStore> = match &config.session.storage_path {
            Some(path) => Arc::new(FileStore::new(path, config.session.storage_key.clone())),
            None => Arc::new(MemoryStore::new()),
        };

        let direct = match &config.network.direct_rpc_url {
            Some(url) => Some(Arc::new(HttpProvider::new(url, timeout)?) as Arc<dyn Eip1193Provider>),
            None => None,
        };

        let engine = Self::new(provider, config, store)?;
        Ok(match direct {
            Some(direct) => engine.with_direct_provider(direct),
            None => engine,
        })
    }

    /// Use `provider` for fresh block numbers when deriving nonces.
    pub fn with_direct_provider(mut self, provider: Arc<dyn Eip1193Provider>) -> Self {
        self.direct = Some(TenRpc::new(provider));
        self
    }

    pub fn config(&self) -> &TenConfig {
        &self.config
    }

    pub fn rpc(&self) -> &TenRpc {
        &self.rpc
    }

    /// Fee quote at `urgency` from the provider's fee history.
    pub async fn estimate_fees(&self, urgency: Urgency) -> FeeQuote {
        self.fees.estimate(&self.rpc, urgency).await
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch the state aggregate.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Receive lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Provision a session key, or reuse the persisted one.
    pub async fn create_session_key(&self) -> SessionResult<Address> {
        self.begin();
        let result = self.create_inner().await;
        self.finish(result)
    }

    async fn create_inner(&self) -> SessionResult<Address> {
        self.ensure_network().await?;

        let persisted = self.store.load().map_err(SessionError::creation)?;
        let current = persisted.or(self.state.borrow().session_key);

        let (session_key, reused) = match current {
            Some(key) => {
                tracing::info!(session_key = %key, "Reusing existing session key");
                (key, true)
            }
            None => {
                let key = self
                    .rpc
                    .session_key_create()
                    .await
                    .map_err(SessionError::creation)?;
                self.store.save(Some(key)).map_err(SessionError::creation)?;
                tracing::info!(session_key = %key, "Created session key");
                (key, false)
            }
        };

        self.state.send_modify(|s| {
            s.session_key = Some(session_key);
            s.is_active = true;
        });
        self.emit(SessionEvent::KeyCreated {
            session_key,
            reused,
        });
        self.watch_provider_events();

        if let Err(e) = self.update_balance().await {
            tracing::warn!(session_key = %session_key, error = %e, "Initial balance refresh failed");
        }
        Ok(session_key)
    }

    /// Transfer `amount` ETH from the wallet account `from` to the session key.
    pub async fn fund_session_key(&self, amount: &str, from: Address) -> SessionResult<TxHash> {
        self.begin();
        let result = self.fund_inner(amount, from).await;
        self.finish(result)
    }

    async fn fund_inner(&self, amount: &str, from: Address) -> SessionResult<TxHash> {
        let session_key = self.require_key()?;
        self.ensure_network().await?;

        let wallet_balance = match self.rpc.pending_balance(from).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!(wallet = %from, error = %e, "Wallet balance unavailable, checking format only");
                None
            }
        };
        let value = amounts::validate_fund_amount(
            amount,
            wallet_balance,
            U256::from(self.config.session.fund_reserve_wei),
        )?;

        let tx_hash = self
            .rpc
            .send_transaction(&CallRequest {
                from: Some(from),
                to: session_key,
                value: Some(value),
                data: None,
            })
            .await?;
        metrics::record_transaction("fund");
        tracing::info!(
            tx_hash = %tx_hash,
            session_key = %session_key,
            amount_eth = %format_eth(value),
            "Funding transaction sent"
        );

        await_receipt(
            &self.rpc,
            tx_hash,
            PollPolicy::funding_from_config(&self.config.polling),
        )
        .await?;

        self.update_balance().await?;
        self.emit(SessionEvent::Funded {
            tx_hash,
            amount: value,
        });
        Ok(tx_hash)
    }

    /// Encode `intent` and have the gateway sign and relay it with the session key.
    pub async fn send_transaction(&self, intent: TransactionIntent) -> SessionResult<TxHash> {
        self.begin();
        let result = self.send_inner(&intent).await;
        self.finish(result)
    }

    async fn send_inner(&self, intent: &TransactionIntent) -> SessionResult<TxHash> {
        let chain_id = self.ensure_network().await?;
        let session_key = self.require_key()?;
        let to = intent.to.ok_or(EncodingError::MissingField("to"))?;

        let nonce = match intent.nonce {
            Some(nonce) => nonce,
            None => self.derive_nonce(session_key).await?,
        };

        let fees = match intent.explicit_fees() {
            Some(quote) => quote?,
            None => {
                self.fees
                    .estimate(&self.rpc, self.config.fees.default_urgency)
                    .await
            }
        };

        let gas_limit = match intent.gas_limit {
            Some(gas_limit) => gas_limit,
            None => {
                self.rpc
                    .estimate_gas(&CallRequest {
                        from: Some(session_key),
                        to,
                        value: intent.value,
                        data: intent.data.clone(),
                    })
                    .await?
            }
        };

        let raw = encoding::encode(intent, chain_id, nonce, fees, gas_limit)?;
        tracing::debug!(
            nonce = nonce,
            gas_limit = gas_limit,
            max_fee_per_gas = fees.max_fee_per_gas(),
            raw_tx = %raw,
            "Encoded session transaction"
        );

        let tx_hash = self
            .rpc
            .session_key_execute(session_key, &raw.to_base64())
            .await?;
        metrics::record_transaction("execute");
        tracing::info!(tx_hash = %tx_hash, to = %to, nonce = nonce, "Session transaction submitted");
        self.emit(SessionEvent::TransactionSent { tx_hash });
        Ok(tx_hash)
    }

    /// Refresh the balance snapshot from the pending balance.
    ///
    /// Returns `Ok(None)` without touching the network when a refresh is
    /// already in flight.
    pub async fn update_balance(&self) -> SessionResult<Option<SessionBalance>> {
        let session_key = self.require_key()?;

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Balance refresh already in flight");
            return Ok(None);
        }
        let _guard = RefreshGuard(&self.refreshing);
        self.state.send_modify(|s| s.is_refreshing_balance = true);

        let result = self.fetch_balance(session_key).await;

        self.state.send_modify(|s| {
            s.is_refreshing_balance = false;
            if let Ok(balance) = &result {
                // The key may have been deleted while the lookup was running.
                if s.session_key == Some(session_key) {
                    s.balance = Some(balance.clone());
                }
            }
        });

        match result {
            Ok(balance) => {
                metrics::record_balance(balance.eth);
                tracing::debug!(
                    session_key = %session_key,
                    balance_wei = %balance.wei,
                    estimated_transactions = balance.estimated_transactions,
                    "Balance updated"
                );
                self.emit(SessionEvent::BalanceUpdated(balance.clone()));
                Ok(Some(balance))
            }
            Err(e) => {
                tracing::warn!(session_key = %session_key, error = %e, "Balance refresh failed");
                Err(e)
            }
        }
    }

    async fn fetch_balance(&self, session_key: Address) -> SessionResult<SessionBalance> {
        let wei = self.rpc.pending_balance(session_key).await?;
        let fees = self
            .fees
            .estimate(&self.rpc, self.config.fees.default_urgency)
            .await;
        Ok(SessionBalance {
            wei,
            eth: amounts::to_eth_f64(wei),
            estimated_transactions: amounts::estimate_transactions(
                wei,
                fees.max_fee_per_gas(),
                self.config.session.transfer_gas_limit,
            ),
        })
    }

    /// Send funds from the session key to `recipient`.
    ///
    /// `None` sweeps everything above the gas reserve.
    pub async fn withdraw_from_session_key(
        &self,
        recipient: Address,
        amount: Option<&str>,
    ) -> SessionResult<WithdrawalOutcome> {
        self.begin();
        let result = self.withdraw_inner(recipient, amount).await;
        self.finish(result)
    }

    async fn withdraw_inner(
        &self,
        recipient: Address,
        amount: Option<&str>,
    ) -> SessionResult<WithdrawalOutcome> {
        let session_key = self.require_key()?;
        let balance = self.rpc.pending_balance(session_key).await?;
        let reserve = U256::from(self.config.session.withdraw_reserve_wei);

        let value = match amount {
            Some(amount) => amounts::validate_withdraw_amount(amount, balance, reserve)?,
            None if balance <= reserve => {
                tracing::info!(
                    session_key = %session_key,
                    balance_wei = %balance,
                    "Balance within gas reserve, nothing to withdraw"
                );
                let outcome = WithdrawalOutcome::NothingToWithdraw { balance };
                self.emit(SessionEvent::Withdrawal(outcome.clone()));
                return Ok(outcome);
            }
            None => balance - reserve,
        };

        tracing::info!(
            session_key = %session_key,
            recipient = %recipient,
            amount_eth = %format_eth(value),
            "Withdrawing from session key"
        );
        let tx_hash = self
            .send_inner(&TransactionIntent::transfer(recipient, value))
            .await?;
        await_receipt(
            &self.rpc,
            tx_hash,
            PollPolicy::from_config(&self.config.polling),
        )
        .await?;

        self.update_balance().await?;
        let outcome = WithdrawalOutcome::Withdrawn {
            tx_hash,
            amount: value,
        };
        self.emit(SessionEvent::Withdrawal(outcome.clone()));
        Ok(outcome)
    }

    /// Destroy the session key at the gateway. Funds still on it are lost.
    pub async fn delete_session_key(&self) -> SessionResult<()> {
        self.begin();
        let result = self.delete_inner().await;
        self.finish(result)
    }

    async fn delete_inner(&self) -> SessionResult<()> {
        let session_key = self.require_key()?;
        self.ensure_network().await?;

        self.rpc.session_key_delete(session_key).await?;
        tracing::info!(session_key = %session_key, "Session key deleted");
        self.forget_key()?;
        self.emit(SessionEvent::KeyDeleted {
            session_key: Some(session_key),
        });
        Ok(())
    }

    /// Destroy whatever key the gateway holds for the account, for when the
    /// local identifier was lost.
    pub async fn cleanup_session_key(&self) -> SessionResult<()> {
        self.begin();
        let result = self.cleanup_inner().await;
        self.finish(result)
    }

    async fn cleanup_inner(&self) -> SessionResult<()> {
        self.ensure_network().await?;
        self.rpc.session_key_cleanup().await?;
        tracing::info!("Remote session key cleaned up");
        self.forget_key()?;
        self.emit(SessionEvent::KeyDeleted { session_key: None });
        Ok(())
    }

    /// Sweep the session key to `recipient`, then delete it.
    ///
    /// The key is only deleted once the withdrawal is confirmed (or there was
    /// nothing to withdraw). Any failure leaves the key in place and the
    /// deletion state at `Error`.
    pub async fn confirm_delete_session(
        &self,
        recipient: Address,
    ) -> SessionResult<WithdrawalOutcome> {
        self.begin();
        let current = self.state.borrow().deletion;
        if current != DeletionState::Idle {
            return self.finish(Err(PreconditionError::DeletionInProgress(current).into()));
        }
        self.set_deletion(DeletionState::Active);

        let result = async {
            self.require_key()?;
            self.ensure_network().await?;

            self.set_deletion(DeletionState::Withdrawing);
            let outcome = self.withdraw_inner(recipient, None).await?;

            self.set_deletion(DeletionState::Deleting);
            self.delete_inner().await?;
            Ok::<_, SessionError>(outcome)
        }
        .await;

        match &result {
            Ok(outcome) => {
                self.set_deletion(DeletionState::Completed);
                metrics::record_deletion("completed");
                tracing::info!(?outcome, "Session deletion completed");
            }
            Err(e) => {
                self.set_deletion(DeletionState::Error);
                metrics::record_deletion("error");
                tracing::error!(error = %e, "Session deletion failed, key retained");
            }
        }
        self.finish(result)
    }

    /// Return the deletion saga to `Idle` once it has finished or failed.
    pub fn reset_deletion_state(&self) -> SessionResult<()> {
        let current = self.state.borrow().deletion;
        if current.in_flight() {
            return Err(PreconditionError::DeletionInProgress(current).into());
        }
        self.state.send_modify(|s| {
            s.deletion = DeletionState::Idle;
            s.error = None;
        });
        self.emit(SessionEvent::DeletionStateChanged(DeletionState::Idle));
        Ok(())
    }

    /// Forget the session key locally without touching the gateway.
    pub fn clear_local_state(&self) -> SessionResult<()> {
        self.store.save(None)?;
        self.stop_watching();
        self.state.send_replace(SessionState::default());
        tracing::info!("Local session state cleared");
        self.emit(SessionEvent::Cleared);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    fn finish<T>(&self, result: SessionResult<T>) -> SessionResult<T> {
        let error = result.as_ref().err().cloned();
        if let Some(e) = &error {
            tracing::error!(error = %e, "Session operation failed");
        }
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.error = error;
        });
        result
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn set_deletion(&self, next: DeletionState) {
        let current = self.state.borrow().deletion;
        debug_assert!(
            current.can_transition_to(next),
            "invalid deletion transition {current} -> {next}"
        );
        tracing::debug!(from = %current, to = %next, "Deletion state");
        self.state.send_modify(|s| s.deletion = next);
        self.emit(SessionEvent::DeletionStateChanged(next));
    }

    fn require_key(&self) -> SessionResult<Address> {
        self.state
            .borrow()
            .session_key
            .ok_or_else(|| PreconditionError::NoSessionKey.into())
    }

    /// Check the provider is on the configured chain and return its id.
    async fn ensure_network(&self) -> SessionResult<u64> {
        let expected = self.config.network.chain_id;
        let actual = self.rpc.chain_id().await?;
        if actual != expected {
            tracing::warn!(expected = expected, actual = actual, "Wrong network");
            return Err(PreconditionError::WrongNetwork { expected, actual }.into());
        }
        Ok(actual)
    }

    async fn derive_nonce(&self, session_key: Address) -> SessionResult<u64> {
        let direct_tip = match &self.direct {
            Some(direct) => match direct.block_number().await {
                Ok(block) => Some(block),
                Err(e) => {
                    tracing::warn!(error = %e, "Direct block number lookup failed, using provider");
                    None
                }
            },
            None => None,
        };
        let tip = match direct_tip {
            Some(block) => block,
            None => self.rpc.block_number().await?,
        };

        let nonce = self.rpc.transaction_count(session_key, tip).await?;
        tracing::debug!(session_key = %session_key, block = tip, nonce = nonce, "Derived nonce");
        Ok(nonce)
    }

    fn forget_key(&self) -> SessionResult<()> {
        self.store.save(None)?;
        self.stop_watching();
        self.state.send_modify(|s| {
            s.session_key = None;
            s.is_active = false;
            s.balance = None;
        });
        Ok(())
    }

    /// Deactivate the session when the wallet switches account or chain.
    ///
    /// One watcher runs per session key; [`Self::forget_key`] aborts it, so a
    /// key created afterwards always gets a fresh watcher.
    fn watch_provider_events(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Some(mut provider_events) = self.rpc.events() else {
            return;
        };

        let state = Arc::clone(&self.state);
        let events = self.events.clone();

        *watcher = Some(tokio::spawn(async move {
            loop {
                match provider_events.recv().await {
                    Ok(event) => {
                        tracing::info!(?event, "Wallet changed, deactivating session");
                        state.send_modify(|s| s.is_active = false);
                        let _ = events.send(SessionEvent::Deactivated(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Provider events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Provider event watcher stopped");
        }));
    }

    fn stop_watching(&self) {
        let handle = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Provider event watcher aborted");
        }
    }
}

impl Drop for SessionKeyEngine {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl std::fmt::Debug for SessionKeyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyEngine")
            .field("chain_id", &self.config.network.chain_id)
            .field("session_key", &self.state.borrow().session_key)
            .finish()
    }
}
