//! Collaborator traits

use escrow_api::{Amount, PreAuthorization};
use escrow_util::{AccountId, ChargerId, VehicleRef};
use thiserror::Error;

/// Errors from the value-transfer ledger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient balance for {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },

    #[error("Insufficient authorization for {account}: needed {needed}, approved {approved}")]
    InsufficientAuthorization {
        account: AccountId,
        needed: Amount,
        approved: Amount,
    },

    #[error("Invalid pre-authorization: {0}")]
    InvalidPreAuthorization(String),

    #[error("Account frozen: {0}")]
    AccountFrozen(AccountId),

    #[error("Amount overflow")]
    Overflow,

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Registered owner and status of a charger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargerInfo {
    pub owner: AccountId,
    pub active: bool,
}

/// One leg of a payout from escrow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub recipient: AccountId,
    pub amount: Amount,
}

impl Payout {
    pub fn new(recipient: AccountId, amount: Amount) -> Self {
        Self { recipient, amount }
    }
}

/// Vehicle ownership lookups
pub trait IdentityRegistry: Send + Sync {
    /// Registered owner of a vehicle, if the reference resolves
    fn owner_of(&self, vehicle_ref: &VehicleRef) -> Option<AccountId>;
}

/// Charger ownership and status lookups
pub trait ProviderRegistry: Send + Sync {
    /// Owner and active flag of a charger, if it is registered
    fn info(&self, charger_id: &ChargerId) -> Option<ChargerInfo>;
}

/// Moves value between participant accounts and the escrow
pub trait LedgerGateway: Send + Sync {
    /// Pull `amount` from `payer` into escrow.
    ///
    /// A pre-authorization, when given, stands in for a prior allowance.
    fn transfer_in(
        &self,
        payer: &AccountId,
        amount: Amount,
        pre_authorization: Option<&PreAuthorization>,
    ) -> LedgerResult<()>;

    /// Pay every leg out of escrow, or none of them.
    fn payout(&self, payouts: &[Payout]) -> LedgerResult<()>;

    /// Pay a single recipient out of escrow
    fn transfer_out(&self, recipient: &AccountId, amount: Amount) -> LedgerResult<()> {
        self.payout(&[Payout::new(recipient.clone(), amount)])
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
