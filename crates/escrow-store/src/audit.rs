//! Audit event types

use chrono::{DateTime, Utc};
use escrow_api::Amount;
use escrow_util::{AccountId, ChargerId, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Deposit reserved and session opened
    SessionCreated {
        session_id: SessionId,
        driver: AccountId,
        payer: AccountId,
        charger_id: ChargerId,
        reserved: Amount,
    },

    DepositAdded {
        session_id: SessionId,
        payer: AccountId,
        amount: Amount,
        reserved: Amount,
    },

    ChargeProposed {
        session_id: SessionId,
        amount: Amount,
    },

    Disputed { session_id: SessionId },

    /// Deposit paid out, by timeout or by the arbitrator
    Settled {
        session_id: SessionId,
        driver_amount: Amount,
        charger_recipient: AccountId,
        charger_amount: Amount,
        resolved_by: Option<AccountId>,
    },

    Refunded {
        session_id: SessionId,
        driver: AccountId,
        amount: Amount,
    },

    TrustedChargerSet {
        driver: AccountId,
        charger_id: ChargerId,
        trusted: bool,
    },

    ParamsUpdated {
        min_deposit: Amount,
        max_deposit: Amount,
        refund_timeout: Duration,
    },

    /// Client connected
    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: escrow_util::now(),
            event,
        }
    }
}
