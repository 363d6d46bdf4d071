//! Event types for escrowd -> client streaming

use chrono::{DateTime, Utc};
use escrow_util::{AccountId, ChargerId, SessionId, VehicleRef};
use serde::{Deserialize, Serialize};

use crate::{Amount, Params, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: escrow_util::now(),
            payload,
        }
    }
}

/// Observations published to indexers and UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionCreated {
        session_id: SessionId,
        driver: AccountId,
        sponsor: Option<AccountId>,
        vehicle_ref: VehicleRef,
        charger_id: ChargerId,
        reserved: Amount,
    },

    DepositAdded {
        session_id: SessionId,
        amount: Amount,
    },

    ChargeProposed {
        session_id: SessionId,
        amount: Amount,
    },

    Disputed {
        session_id: SessionId,
    },

    /// Deposit paid out; `driver_amount + charger_amount` equals the reserve
    Settled {
        session_id: SessionId,
        driver_amount: Amount,
        charger_amount: Amount,
    },

    Refunded {
        session_id: SessionId,
        amount: Amount,
    },

    TrustedChargerSet {
        driver: AccountId,
        charger_id: ChargerId,
        trusted: bool,
    },

    ParamsUpdated(Params),

    /// Service is shutting down
    Shutdown,
}
