//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, attempts > 0, URLs parse)
//! - Check fee tables are internally consistent
//!
//! Returns all validation errors, not just the first.

use crate::config::schema::TenConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &TenConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if url::Url::parse(&config.network.rpc_url).is_err() {
        errors.push(ValidationError::new("network.rpc_url", "not a valid URL"));
    }
    if let Some(direct) = &config.network.direct_rpc_url {
        if url::Url::parse(direct).is_err() {
            errors.push(ValidationError::new("network.direct_rpc_url", "not a valid URL"));
        }
    }
    if config.network.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("network.rpc_timeout_secs", "must be > 0"));
    }

    let fees = &config.fees;
    if fees.history_blocks == 0 {
        errors.push(ValidationError::new("fees.history_blocks", "must be > 0"));
    }
    if fees.reward_percentiles.len() != 3 {
        errors.push(ValidationError::new(
            "fees.reward_percentiles",
            format!("expected 3 percentiles, got {}", fees.reward_percentiles.len()),
        ));
    } else if !fees
        .reward_percentiles
        .windows(2)
        .all(|w| w[0] < w[1])
        || fees.reward_percentiles.iter().any(|p| !(0.0..=100.0).contains(p))
    {
        errors.push(ValidationError::new(
            "fees.reward_percentiles",
            "must be strictly increasing within 0..=100",
        ));
    }
    let m = &fees.base_fee_multiplier_percent;
    if m.low < 100 || m.medium < 100 || m.high < 100 {
        errors.push(ValidationError::new(
            "fees.base_fee_multiplier_percent",
            "multipliers below 100% would under-price the base fee",
        ));
    }
    if fees.min_priority_fee_wei == 0 {
        errors.push(ValidationError::new("fees.min_priority_fee_wei", "must be > 0"));
    }

    if config.polling.interval_ms == 0 {
        errors.push(ValidationError::new("polling.interval_ms", "must be > 0"));
    }
    if config.polling.max_attempts == 0 {
        errors.push(ValidationError::new("polling.max_attempts", "must be > 0"));
    }
    if config.polling.funding_max_attempts == 0 {
        errors.push(ValidationError::new("polling.funding_max_attempts", "must be > 0"));
    }

    if config.session.transfer_gas_limit < 21_000 {
        errors.push(ValidationError::new(
            "session.transfer_gas_limit",
            "must be at least 21000",
        ));
    }
    if config.session.storage_key.is_empty() {
        errors.push(ValidationError::new("session.storage_key", "must not be empty"));
    }

    if url::Url::parse(&config.token.base_url).is_err() {
        errors.push(ValidationError::new("token.base_url", "not a valid URL"));
    }
    if config.token.fetch_attempts == 0 {
        errors.push(ValidationError::new("token.fetch_attempts", "must be > 0"));
    }
    if config.token.storage_key.is_empty() {
        errors.push(ValidationError::new("token.storage_key", "must not be empty"));
    } else if config.token.storage_key == config.session.storage_key {
        errors.push(ValidationError::new(
            "token.storage_key",
            "must differ from session.storage_key",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
