//! Percentile-based EIP-1559 fee estimation.
//!
//! # Algorithm
//! ```text
//! eth_feeHistory(N, latest, [25, 50, 75])
//!     → latest base fee × urgency multiplier (truncated)
//!     → lower median of the urgency's reward column (zero → floor)
//!     → maxFee = adjusted base + priority
//! ```
//!
//! Estimation never fails: any RPC or shape problem falls back to a fixed
//! table so a transaction is never blocked on fee data.

use alloy::rpc::types::FeeHistory;
use serde::{Deserialize, Serialize};

use crate::blockchain::rpc::TenRpc;
use crate::blockchain::types::EncodingError;
use crate::config::schema::FeeConfig;
use crate::observability::metrics;

/// Inclusion-speed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl Urgency {
    /// Column of the reward matrix sampled for this tier.
    pub fn percentile_index(self) -> usize {
        match self {
            Urgency::Low => 0,
            Urgency::Medium => 1,
            Urgency::High => 2,
        }
    }
}

impl std::str::FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "medium" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            other => Err(format!("unknown urgency '{}'", other)),
        }
    }
}

/// A max-fee / priority-fee pair with `max_fee_per_gas >= max_priority_fee_per_gas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
}

impl FeeQuote {
    pub fn new(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Result<Self, EncodingError> {
        if max_fee_per_gas < max_priority_fee_per_gas {
            return Err(EncodingError::InvalidFees {
                max_fee: max_fee_per_gas,
                priority_fee: max_priority_fee_per_gas,
            });
        }
        Ok(Self {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    pub fn max_fee_per_gas(&self) -> u128 {
        self.max_fee_per_gas
    }

    pub fn max_priority_fee_per_gas(&self) -> u128 {
        self.max_priority_fee_per_gas
    }
}

/// Fee estimator bound to a fee configuration.
#[derive(Debug, Clone)]
pub struct FeeEstimator {
    config: FeeConfig,
}

impl FeeEstimator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Estimate fees for `urgency`, falling back to the fixed table on any failure.
    pub async fn estimate(&self, rpc: &TenRpc, urgency: Urgency) -> FeeQuote {
        let history = match rpc
            .fee_history(self.config.history_blocks, &self.config.reward_percentiles)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, ?urgency, "Fee history unavailable, using fallback fees");
                metrics::record_fee_fallback("rpc");
                return self.fallback(urgency);
            }
        };

        match self.from_history(&history, urgency) {
            Some(quote) => {
                tracing::debug!(
                    ?urgency,
                    max_fee_per_gas = quote.max_fee_per_gas,
                    max_priority_fee_per_gas = quote.max_priority_fee_per_gas,
                    "Estimated fees"
                );
                quote
            }
            None => {
                tracing::warn!(?urgency, "Malformed fee history, using fallback fees");
                metrics::record_fee_fallback("malformed");
                self.fallback(urgency)
            }
        }
    }

    /// Derive a quote from a fee history; `None` when the history is unusable.
    pub fn from_history(&self, history: &FeeHistory, urgency: Urgency) -> Option<FeeQuote> {
        let base_fee = *history.base_fee_per_gas.last()?;

        let column = urgency.percentile_index();
        let mut samples = history
            .reward
            .as_ref()?
            .iter()
            .map(|block| block.get(column).copied())
            .collect::<Option<Vec<u128>>>()?;
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        let median = samples[samples.len() / 2];

        let priority_fee = if median > 0 {
            median
        } else {
            u128::from(self.config.min_priority_fee_wei)
        };
        let adjusted_base = base_fee.checked_mul(self.multiplier_percent(urgency))? / 100;

        FeeQuote::new(adjusted_base.checked_add(priority_fee)?, priority_fee).ok()
    }

    /// Deterministic quote used when fee history cannot be consulted.
    pub fn fallback(&self, urgency: Urgency) -> FeeQuote {
        let priority_fee = u128::from(
            self.config.fallback_priority_fee_wei[urgency.percentile_index()],
        );
        FeeQuote {
            max_fee_per_gas: u128::from(self.config.fallback_base_fee_wei) + priority_fee,
            max_priority_fee_per_gas: priority_fee,
        }
    }

    fn multiplier_percent(&self, urgency: Urgency) -> u128 {
        let m = &self.config.base_fee_multiplier_percent;
        u128::from(match urgency {
            Urgency::Low => m.low,
            Urgency::Medium => m.medium,
            Urgency::High => m.high,
        })
    }
}
