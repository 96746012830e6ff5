//! ETH amount parsing, formatting and the funding/withdrawal helpers.

use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::U256;
use thiserror::Error;

/// 10^15 wei: the granularity of suggested amounts (3 decimals).
const MILLI_ETHER: u64 = 1_000_000_000_000_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount is required")]
    Empty,

    #[error("'{0}' is not a valid ETH amount")]
    Invalid(String),

    #[error("Amount must be greater than zero")]
    NotPositive,

    #[error(
        "Amount exceeds available balance (reserves {} ETH for gas)",
        reserve_eth(.required, .requested)
    )]
    ExceedsAvailable {
        available: U256,
        requested: U256,
        required: U256,
    },
}

fn reserve_eth(required: &U256, requested: &U256) -> String {
    format_eth(required.saturating_sub(*requested))
}

/// Parse a decimal ETH string into wei.
pub fn parse_eth(amount: &str) -> Result<U256, AmountError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(AmountError::Empty);
    }
    // parse_ether accepts a sign and yields the absolute value
    if amount.starts_with('-') || amount.starts_with('+') {
        return Err(AmountError::Invalid(amount.to_string()));
    }
    parse_ether(amount).map_err(|_| AmountError::Invalid(amount.to_string()))
}

/// Parse an amount that must be strictly positive.
pub fn parse_positive_eth(amount: &str) -> Result<U256, AmountError> {
    let wei = parse_eth(amount)?;
    if wei.is_zero() {
        return Err(AmountError::NotPositive);
    }
    Ok(wei)
}

/// Format wei as ETH without trailing zeros ("1.5", "0.0002", "0").
pub fn format_eth(wei: U256) -> String {
    let formatted = format_ether(wei);
    match formatted.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, frac)
            }
        }
        None => formatted,
    }
}

/// Lossy ETH value for display.
pub fn to_eth_f64(wei: U256) -> f64 {
    format_ether(wei).parse().unwrap_or(0.0)
}

/// Suggested amount: `percent`% of the balance above `reserve`, floored to
/// 3 decimals and rendered with exactly 3 decimals.
pub fn quick_amount(balance: U256, reserve: U256, percent: u8) -> String {
    let available = balance.saturating_sub(reserve);
    let share = available * U256::from(percent) / U256::from(100u8);
    let step = U256::from(MILLI_ETHER);
    let floored = share - share % step;

    let ether = U256::from(1000u64) * step;
    let whole = floored / ether;
    let millis = (floored % ether) / step;
    format!("{}.{:03}", whole, millis)
}

/// Validate a funding amount against the wallet balance, keeping `reserve`
/// in the wallet for gas. Without a known balance only the format is checked.
pub fn validate_fund_amount(
    amount: &str,
    wallet_balance: Option<U256>,
    reserve: U256,
) -> Result<U256, AmountError> {
    let wei = parse_positive_eth(amount)?;
    if let Some(balance) = wallet_balance {
        check_available(wei, balance, reserve)?;
    }
    Ok(wei)
}

/// Validate a withdrawal amount against the session balance, keeping
/// `reserve` on the session key for the withdrawal's own gas.
pub fn validate_withdraw_amount(
    amount: &str,
    session_balance: U256,
    reserve: U256,
) -> Result<U256, AmountError> {
    let wei = parse_positive_eth(amount)?;
    check_available(wei, session_balance, reserve)?;
    Ok(wei)
}

fn check_available(requested: U256, available: U256, reserve: U256) -> Result<(), AmountError> {
    let required = requested.saturating_add(reserve);
    if available < required {
        return Err(AmountError::ExceedsAvailable {
            available,
            requested,
            required,
        });
    }
    Ok(())
}

/// How many transactions of `gas_limit` at `gas_price` the balance covers.
pub fn estimate_transactions(balance: U256, gas_price: u128, gas_limit: u64) -> u64 {
    let cost = U256::from(gas_price) * U256::from(gas_limit);
    if cost.is_zero() {
        return 0;
    }
    let count = balance / cost;
    count.try_into().unwrap_or(u64::MAX)
}
