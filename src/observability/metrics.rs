//! Metrics collection.
//!
//! # Metrics
//! - `ten_session_transactions_total` (counter): submissions by kind
//! - `ten_session_fee_fallback_total` (counter): fee estimates served from the fallback table
//! - `ten_session_receipt_polls_total` (counter): receipt lookups
//! - `ten_session_deletions_total` (counter): deletion saga outcomes
//! - `ten_session_balance_eth` (gauge): last observed session key balance
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op.

use metrics::{counter, gauge};

pub fn record_transaction(kind: &'static str) {
    counter!("ten_session_transactions_total", "kind" => kind).increment(1);
}

pub fn record_fee_fallback(reason: &'static str) {
    counter!("ten_session_fee_fallback_total", "reason" => reason).increment(1);
}

pub fn record_poll_attempt() {
    counter!("ten_session_receipt_polls_total").increment(1);
}

pub fn record_deletion(outcome: &'static str) {
    counter!("ten_session_deletions_total", "outcome" => outcome).increment(1);
}

pub fn record_balance(eth: f64) {
    gauge!("ten_session_balance_eth").set(eth);
}
