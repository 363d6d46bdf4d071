//! Engine errors

use escrow_api::{ErrorCode, SessionState};
use escrow_gateway::LedgerError;
use escrow_store::StoreError;
use escrow_util::{AccountId, ChargerId, SessionId};
use thiserror::Error;

/// Why an escrow operation was refused
#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Not registered: {0}")]
    NotRegistered(String),

    #[error("{caller} is not the driver of this session")]
    NotDriver { caller: AccountId },

    #[error("{caller} is not the declared sponsor {sponsor}")]
    NotSponsor {
        caller: AccountId,
        sponsor: AccountId,
    },

    #[error("{caller} does not own charger {charger_id}")]
    NotChargerOwner {
        caller: AccountId,
        charger_id: ChargerId,
    },

    #[error("{driver} has not trusted charger {charger_id}")]
    NotTrusted {
        driver: AccountId,
        charger_id: ChargerId,
    },

    #[error("{caller} is not the escrow admin")]
    NotAdmin { caller: AccountId },

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Session {session_id} is {state}: {reason}")]
    BadState {
        session_id: SessionId,
        state: SessionState,
        reason: &'static str,
    },

    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type EscrowResult<T> = Result<T, EscrowError>;

impl EscrowError {
    /// Wire code reported to clients
    pub fn code(&self) -> ErrorCode {
        match self {
            EscrowError::NotRegistered(_) => ErrorCode::NotRegistered,
            EscrowError::NotDriver { .. } => ErrorCode::NotDriver,
            EscrowError::NotSponsor { .. } => ErrorCode::NotSponsor,
            EscrowError::NotChargerOwner { .. } => ErrorCode::NotChargerOwner,
            EscrowError::NotTrusted { .. } => ErrorCode::NotTrusted,
            EscrowError::NotAdmin { .. } => ErrorCode::NotAdmin,
            EscrowError::OutOfBounds(_) => ErrorCode::OutOfBounds,
            EscrowError::BadState { .. } => ErrorCode::BadState,
            EscrowError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            EscrowError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                ErrorCode::InsufficientBalance
            }
            EscrowError::Ledger(LedgerError::InsufficientAuthorization { .. }) => {
                ErrorCode::InsufficientAuthorization
            }
            EscrowError::Ledger(_) => ErrorCode::LedgerError,
            EscrowError::Store(_) => ErrorCode::StoreError,
        }
    }
}
