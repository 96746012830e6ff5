//! Receipt polling with a fixed interval and bounded attempts.
//!
//! # Outcomes
//! - receipt with status 1 → confirmed
//! - receipt with status 0 → `PollError::Reverted`
//! - no receipt after `max_attempts` lookups → `PollError::Timeout`
//!
//! Lookup errors are logged and count as a missed attempt; only exhausting the
//! budget is terminal. There is no jitter or backoff growth.

use alloy::primitives::TxHash;
use alloy::rpc::types::TransactionReceipt;
use std::time::Duration;
use tokio::time::sleep;

use crate::blockchain::rpc::TenRpc;
use crate::blockchain::types::PollError;
use crate::config::schema::PollingConfig;
use crate::observability::metrics;

/// Interval and attempt budget for one polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    /// Policy for receipts of session-key transactions.
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Policy for receipts of wallet funding transfers.
    pub fn funding_from_config(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            max_attempts: config.funding_max_attempts,
        }
    }
}

/// Wait for `tx_hash` to be mined.
pub async fn await_receipt(
    rpc: &TenRpc,
    tx_hash: TxHash,
    policy: PollPolicy,
) -> Result<TransactionReceipt, PollError> {
    for attempt in 1..=policy.max_attempts {
        metrics::record_poll_attempt();

        match rpc.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) if receipt.status() => {
                tracing::info!(
                    tx_hash = %tx_hash,
                    attempt = attempt,
                    block_number = ?receipt.block_number,
                    "Transaction confirmed"
                );
                return Ok(receipt);
            }
            Ok(Some(receipt)) => {
                tracing::error!(tx_hash = %tx_hash, attempt = attempt, "Transaction reverted");
                return Err(PollError::Reverted {
                    tx_hash,
                    block_number: receipt.block_number,
                });
            }
            Ok(None) => {
                tracing::debug!(tx_hash = %tx_hash, attempt = attempt, "Transaction pending");
            }
            Err(e) => {
                tracing::warn!(tx_hash = %tx_hash, attempt = attempt, error = %e, "Receipt lookup failed");
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    tracing::error!(
        tx_hash = %tx_hash,
        attempts = policy.max_attempts,
        "Transaction confirmation timeout"
    );
    Err(PollError::Timeout {
        tx_hash,
        attempts: policy.max_attempts,
    })
}
