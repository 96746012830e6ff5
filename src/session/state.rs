//! Session state aggregate, deletion lifecycle and change events.

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::blockchain::client::ProviderEvent;
use crate::session::error::SessionError;

/// Progress of the safe-deletion saga.
///
/// ```text
/// Idle → Active → Withdrawing → Deleting → Completed
///          │           │            │
///          └───────────┴────────────┴──→ Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionState {
    #[default]
    Idle,
    Active,
    Withdrawing,
    Deleting,
    Completed,
    Error,
}

impl DeletionState {
    /// Whether the saga may move from `self` to `next`.
    pub fn can_transition_to(self, next: DeletionState) -> bool {
        use DeletionState::*;
        matches!(
            (self, next),
            (Idle, Active)
                | (Active, Withdrawing)
                | (Withdrawing, Deleting)
                | (Deleting, Completed)
                | (Active, Error)
                | (Withdrawing, Error)
                | (Deleting, Error)
        )
    }

    /// A saga is running and must not be restarted or reset.
    pub fn in_flight(self) -> bool {
        matches!(
            self,
            DeletionState::Active | DeletionState::Withdrawing | DeletionState::Deleting
        )
    }
}

impl std::fmt::Display for DeletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeletionState::Idle => "idle",
            DeletionState::Active => "active",
            DeletionState::Withdrawing => "withdrawing",
            DeletionState::Deleting => "deleting",
            DeletionState::Completed => "completed",
            DeletionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Balance snapshot of the session key; replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBalance {
    pub wei: U256,
    pub eth: f64,
    /// Plain transfers the balance covers at the current medium fee.
    pub estimated_transactions: u64,
}

/// Result of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    /// Funds were sent and the transfer confirmed.
    Withdrawn { tx_hash: TxHash, amount: U256 },
    /// Sweep requested but the balance does not exceed the gas reserve.
    NothingToWithdraw { balance: U256 },
}

/// Everything a UI needs to render the session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub session_key: Option<Address>,
    pub is_active: bool,
    pub balance: Option<SessionBalance>,
    pub is_loading: bool,
    pub is_refreshing_balance: bool,
    pub error: Option<SessionError>,
    pub deletion: DeletionState,
}

/// Notifications published on every meaningful state change.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    KeyCreated { session_key: Address, reused: bool },
    Funded { tx_hash: TxHash, amount: U256 },
    TransactionSent { tx_hash: TxHash },
    BalanceUpdated(SessionBalance),
    Withdrawal(WithdrawalOutcome),
    KeyDeleted { session_key: Option<Address> },
    DeletionStateChanged(DeletionState),
    Deactivated(ProviderEvent),
    Cleared,
}
