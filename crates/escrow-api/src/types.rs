//! Shared types for the escrowd API

use chrono::{DateTime, Utc};
use escrow_util::{AccountId, ChargerId, SessionId, VehicleRef};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value in the ledger's smallest unit
pub type Amount = u64;

/// Escrow session lifecycle state
///
/// `Active -> Proposed -> (Disputed ->) Settled`, or `Active -> Refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Proposed,
    Disputed,
    Settled,
    Refunded,
}

impl SessionState {
    /// Whether the lifecycle graph has an edge `self -> next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Active, Proposed)
                | (Active, Refunded)
                | (Proposed, Disputed)
                | (Proposed, Settled)
                | (Disputed, Settled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Proposed => "proposed",
            SessionState::Disputed => "disputed",
            SessionState::Settled => "settled",
            SessionState::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionState::Active),
            "proposed" => Some(SessionState::Proposed),
            "disputed" => Some(SessionState::Disputed),
            "settled" => Some(SessionState::Settled),
            "refunded" => Some(SessionState::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one escrow session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Consumer of record; receives every refund
    pub driver: AccountId,
    /// Third party that funded the deposit, if any
    pub sponsor: Option<AccountId>,
    pub vehicle_ref: VehicleRef,
    pub charger_id: ChargerId,
    /// Deposit currently held in escrow
    pub reserved: Amount,
    /// Charge declared by the charger owner; set once proposed
    pub proposed: Option<Amount>,
    pub state: SessionState,
    pub start_ts: DateTime<Utc>,
    pub propose_ts: Option<DateTime<Utc>>,
    /// Timeout in force when the session opened; later parameter updates
    /// do not move its deadlines
    pub refund_timeout: Duration,
}

/// Global escrow parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub min_deposit: Amount,
    pub max_deposit: Amount,
    /// Grace period for both the dispute window and stale refunds
    pub refund_timeout: Duration,
}

impl Params {
    pub fn deposit_in_bounds(&self, amount: Amount) -> bool {
        amount > 0 && amount >= self.min_deposit && amount <= self.max_deposit
    }
}

/// Filter for session listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub driver: Option<AccountId>,
    pub charger_id: Option<ChargerId>,
    pub state: Option<SessionState>,
}

/// Signed one-off authorization to pull funds without a standing allowance
///
/// The engine forwards this to the ledger untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAuthorization {
    pub owner: AccountId,
    pub amount: Amount,
    pub deadline: DateTime<Utc>,
    pub nonce: u64,
    /// Opaque to everything but the ledger
    pub signature: String,
}

/// Role for authorization at the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Drivers, sponsors and charger operators
    Participant,
    /// Arbitrator / operator: can also resolve disputes and update params
    Admin,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_transact(&self) -> bool {
        matches!(self, ClientRole::Participant | ClientRole::Admin)
    }

    pub fn can_administer(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub mock_time: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_lifecycle_graph() {
        use SessionState::*;

        assert!(Active.can_transition_to(Proposed));
        assert!(Active.can_transition_to(Refunded));
        assert!(Proposed.can_transition_to(Disputed));
        assert!(Proposed.can_transition_to(Settled));
        assert!(Disputed.can_transition_to(Settled));

        assert!(!Proposed.can_transition_to(Active));
        assert!(!Proposed.can_transition_to(Refunded));
        assert!(!Disputed.can_transition_to(Proposed));
        assert!(!Active.can_transition_to(Settled));
        for terminal in [Settled, Refunded] {
            for next in [Active, Proposed, Disputed, Settled, Refunded] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn state_string_form_matches_serde() {
        for state in [
            SessionState::Active,
            SessionState::Proposed,
            SessionState::Disputed,
            SessionState::Settled,
            SessionState::Refunded,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("closed"), None);
    }

    #[test]
    fn deposit_bounds_are_inclusive() {
        let params = Params {
            min_deposit: 10,
            max_deposit: 100,
            refund_timeout: Duration::from_secs(60),
        };

        assert!(!params.deposit_in_bounds(9));
        assert!(params.deposit_in_bounds(10));
        assert!(params.deposit_in_bounds(100));
        assert!(!params.deposit_in_bounds(101));
    }

    #[test]
    fn zero_deposit_never_in_bounds() {
        let params = Params {
            min_deposit: 0,
            max_deposit: 100,
            refund_timeout: Duration::from_secs(60),
        };
        assert!(!params.deposit_in_bounds(0));
    }
}
