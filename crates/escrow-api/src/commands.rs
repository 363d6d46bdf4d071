//! Command types for the escrowd protocol

use escrow_util::{AccountId, ChargerId, ClientId, SessionId, VehicleRef};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    Amount, ClientRole, HealthStatus, Params, PreAuthorization, Session, SessionFilter,
    API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Identity the command acts on behalf of; required for mutating commands
    #[serde(default)]
    pub caller: Option<AccountId>,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            caller: None,
            command,
        }
    }

    pub fn with_caller(mut self, caller: AccountId) -> Self {
        self.caller = Some(caller);
        self
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotRegistered,
    NotDriver,
    NotSponsor,
    NotChargerOwner,
    NotTrusted,
    NotAdmin,
    OutOfBounds,
    BadState,
    SessionNotFound,
    InsufficientBalance,
    InsufficientAuthorization,
    LedgerError,
    PermissionDenied,
    RateLimited,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Queries
    GetParams,

    GetSession {
        session_id: SessionId,
    },

    ListSessions {
        #[serde(default)]
        filter: SessionFilter,
        limit: Option<usize>,
    },

    IsTrusted {
        driver: AccountId,
        charger_id: ChargerId,
    },

    // Session creation

    /// Driver- or sponsor-funded session; the caller pays
    CreateSession {
        vehicle_ref: VehicleRef,
        charger_id: ChargerId,
        deposit: Amount,
        sponsor: Option<AccountId>,
        pre_authorization: Option<PreAuthorization>,
    },

    /// Charger-initiated session for a driver who trusts this charger
    CreateSessionByCharger {
        payer: AccountId,
        vehicle_ref: VehicleRef,
        charger_id: ChargerId,
        deposit: Amount,
        pre_authorization: Option<PreAuthorization>,
    },

    /// Charger-initiated session billed to a guest payer
    CreateGuestSession {
        payer: AccountId,
        vehicle_ref: VehicleRef,
        charger_id: ChargerId,
        deposit: Amount,
        pre_authorization: Option<PreAuthorization>,
    },

    // Session lifecycle
    AddDeposit {
        session_id: SessionId,
        amount: Amount,
        pre_authorization: Option<PreAuthorization>,
    },

    EndAndPropose {
        session_id: SessionId,
        amount: Amount,
    },

    Dispute {
        session_id: SessionId,
    },

    FinalizeIfNoDispute {
        session_id: SessionId,
    },

    RefundIfStale {
        session_id: SessionId,
    },

    SetTrustedCharger {
        driver: AccountId,
        charger_id: ChargerId,
        trusted: bool,
    },

    // Admin commands

    /// Split a disputed deposit (admin only)
    ResolveDispute {
        session_id: SessionId,
        driver_amount: Amount,
        charger_amount: Amount,
    },

    /// Replace the escrow parameters for future sessions (admin only)
    UpdateParams {
        min_deposit: Amount,
        max_deposit: Amount,
        refund_timeout: Duration,
    },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Whether the command changes escrow state and therefore needs a caller
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::CreateSession { .. }
                | Command::CreateSessionByCharger { .. }
                | Command::CreateGuestSession { .. }
                | Command::AddDeposit { .. }
                | Command::EndAndPropose { .. }
                | Command::Dispute { .. }
                | Command::FinalizeIfNoDispute { .. }
                | Command::RefundIfStale { .. }
                | Command::SetTrustedCharger { .. }
                | Command::ResolveDispute { .. }
                | Command::UpdateParams { .. }
        )
    }

    /// Whether the transport must see an admin client for this command
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::ResolveDispute { .. } | Command::UpdateParams { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Params(Params),
    /// Current snapshot of a session, also returned after every lifecycle command
    Session(Session),
    Sessions {
        sessions: Vec<Session>,
    },
    Trusted {
        trusted: bool,
    },
    TrustUpdated {
        driver: AccountId,
        charger_id: ChargerId,
        trusted: bool,
    },
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
