//! Core events emitted by the engine

use escrow_api::{Amount, EventPayload, Params};
use escrow_util::{AccountId, ChargerId, SessionId, VehicleRef};

/// Events emitted by the core engine
///
/// These carry a little more than the published observations (the payer of a
/// deposit, the recipient of the charger leg); the daemon drops the extras
/// when broadcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    SessionCreated {
        session_id: SessionId,
        driver: AccountId,
        payer: AccountId,
        sponsor: Option<AccountId>,
        vehicle_ref: VehicleRef,
        charger_id: ChargerId,
        reserved: Amount,
    },

    DepositAdded {
        session_id: SessionId,
        payer: AccountId,
        amount: Amount,
    },

    ChargeProposed {
        session_id: SessionId,
        amount: Amount,
    },

    Disputed {
        session_id: SessionId,
    },

    Settled {
        session_id: SessionId,
        driver_amount: Amount,
        charger_recipient: AccountId,
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
}

impl From<CoreEvent> for EventPayload {
    fn from(event: CoreEvent) -> Self {
        match event {
            CoreEvent::SessionCreated {
                session_id,
                driver,
                sponsor,
                vehicle_ref,
                charger_id,
                reserved,
                ..
            } => EventPayload::SessionCreated {
                session_id,
                driver,
                sponsor,
                vehicle_ref,
                charger_id,
                reserved,
            },
            CoreEvent::DepositAdded {
                session_id, amount, ..
            } => EventPayload::DepositAdded { session_id, amount },
            CoreEvent::ChargeProposed { session_id, amount } => {
                EventPayload::ChargeProposed { session_id, amount }
            }
            CoreEvent::Disputed { session_id } => EventPayload::Disputed { session_id },
            CoreEvent::Settled {
                session_id,
                driver_amount,
                charger_amount,
                ..
            } => EventPayload::Settled {
                session_id,
                driver_amount,
                charger_amount,
            },
            CoreEvent::Refunded { session_id, amount } => {
                EventPayload::Refunded { session_id, amount }
            }
            CoreEvent::TrustedChargerSet {
                driver,
                charger_id,
                trusted,
            } => EventPayload::TrustedChargerSet {
                driver,
                charger_id,
                trusted,
            },
            CoreEvent::ParamsUpdated(params) => EventPayload::ParamsUpdated(params),
        }
    }
}
