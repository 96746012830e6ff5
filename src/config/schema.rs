//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! every section has defaults matching the TEN testnet, so an empty file is a
//! valid configuration.

use serde::{Deserialize, Serialize};

use crate::blockchain::fees::Urgency;

/// One gwei in wei.
pub const GWEI: u64 = 1_000_000_000;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TenConfig {
    /// Chain endpoint settings.
    pub network: NetworkConfig,

    /// Fee estimation settings.
    pub fees: FeeConfig,

    /// Receipt polling settings.
    pub polling: PollingConfig,

    /// Session key lifecycle settings.
    pub session: SessionSettings,

    /// Gateway bearer-token settings.
    pub token: TokenConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Chain endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint the provider talks to.
    pub rpc_url: String,

    /// Public endpoint queried directly for a fresh block number when deriving
    /// nonces. Unset disables the direct lookup.
    pub direct_rpc_url: Option<String>,

    /// Expected chain ID (8443 for TEN testnet).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://testnet.ten.xyz/v1/".to_string(),
            direct_rpc_url: Some("https://testnet-rpc.ten.xyz/v1/".to_string()),
            chain_id: 8443,
            rpc_timeout_secs: 10,
        }
    }
}

/// Base-fee multipliers in percent, per urgency.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MultiplierConfig {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

impl Default for MultiplierConfig {
    fn default() -> Self {
        Self {
            low: 110,
            medium: 120,
            high: 150,
        }
    }
}

/// Fee estimation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Number of trailing blocks requested from `eth_feeHistory`.
    pub history_blocks: u64,

    /// Reward percentiles for LOW / MEDIUM / HIGH, in that order.
    pub reward_percentiles: Vec<f64>,

    /// Base-fee multipliers (110 = 1.1x).
    pub base_fee_multiplier_percent: MultiplierConfig,

    /// Priority fee used when the sampled median is zero.
    pub min_priority_fee_wei: u64,

    /// Base fee assumed when fee history is unavailable.
    pub fallback_base_fee_wei: u64,

    /// Fallback priority fees for LOW / MEDIUM / HIGH.
    pub fallback_priority_fee_wei: [u64; 3],

    /// Urgency used when the caller does not specify fees.
    pub default_urgency: Urgency,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            history_blocks: 10,
            reward_percentiles: vec![25.0, 50.0, 75.0],
            base_fee_multiplier_percent: MultiplierConfig::default(),
            min_priority_fee_wei: GWEI,
            fallback_base_fee_wei: GWEI,
            fallback_priority_fee_wei: [GWEI, 2 * GWEI, 3 * GWEI],
            default_urgency: Urgency::Medium,
        }
    }
}

/// Receipt polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    /// Fixed delay between receipt lookups in milliseconds.
    pub interval_ms: u64,

    /// Lookups before a session-key transaction is declared timed out.
    pub max_attempts: u32,

    /// Lookups before a wallet funding transfer is declared timed out.
    pub funding_max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_attempts: 30,
            funding_max_attempts: 30,
        }
    }
}

/// Session key lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Wei left on the session key to pay for the withdrawal itself.
    pub withdraw_reserve_wei: u64,

    /// Wei left in the user's wallet when suggesting funding amounts.
    pub fund_reserve_wei: u64,

    /// Gas used by a plain transfer; drives `estimated_transactions`.
    pub transfer_gas_limit: u64,

    /// JSON file the session key identifier is persisted to. Unset keeps it
    /// in memory only.
    pub storage_path: Option<String>,

    /// Key under which the identifier is stored.
    pub storage_key: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            withdraw_reserve_wei: 200_000_000_000_000,
            fund_reserve_wei: 1_000_000_000_000_000,
            transfer_gas_limit: 21_000,
            storage_path: None,
            storage_key: "ten-session-key-state".to_string(),
        }
    }
}

/// Gateway bearer-token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Gateway base URL hosting `join/` and `revoke/`.
    pub base_url: String,

    /// WebSocket base URL for authorised subscriptions.
    pub ws_url: String,

    /// Maximum token age before rotation, in seconds.
    pub max_age_secs: u64,

    /// Attempts made when fetching a new token.
    pub fetch_attempts: u32,

    /// Base delay between fetch attempts in milliseconds (multiplied by the attempt number).
    pub retry_delay_ms: u64,

    /// Key under which the token is stored in `session.storage_path`.
    pub storage_key: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            base_url: "https://testnet-rpc.ten.xyz/v1/".to_string(),
            ws_url: "wss://testnet-rpc.ten.xyz:443/v1/".to_string(),
            max_age_secs: 24 * 60 * 60,
            fetch_attempts: 3,
            retry_delay_ms: 1000,
            storage_key: "ten-gateway-token".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
