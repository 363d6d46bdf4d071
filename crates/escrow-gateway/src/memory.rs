//! In-memory registries and ledger
//!
//! Used by the service (seeded from configuration) and by tests.

use escrow_api::{Amount, PreAuthorization};
use escrow_util::{AccountId, ChargerId, VehicleRef};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::{
    ChargerInfo, IdentityRegistry, LedgerError, LedgerGateway, LedgerResult, Payout,
    ProviderRegistry,
};

/// Vehicle registry backed by a map
#[derive(Debug, Default)]
pub struct StaticIdentityRegistry {
    vehicles: RwLock<HashMap<VehicleRef, AccountId>>,
}

impl StaticIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, vehicle_ref: VehicleRef, owner: AccountId) {
        let mut vehicles = self.vehicles.write().unwrap_or_else(|e| e.into_inner());
        vehicles.insert(vehicle_ref, owner);
    }

    pub fn len(&self) -> usize {
        self.vehicles.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityRegistry for StaticIdentityRegistry {
    fn owner_of(&self, vehicle_ref: &VehicleRef) -> Option<AccountId> {
        let vehicles = self.vehicles.read().unwrap_or_else(|e| e.into_inner());
        vehicles.get(vehicle_ref).cloned()
    }
}

/// Charger registry backed by a map
#[derive(Debug, Default)]
pub struct StaticProviderRegistry {
    chargers: RwLock<HashMap<ChargerId, ChargerInfo>>,
}

impl StaticProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, charger_id: ChargerId, owner: AccountId, active: bool) {
        let mut chargers = self.chargers.write().unwrap_or_else(|e| e.into_inner());
        chargers.insert(charger_id, ChargerInfo { owner, active });
    }

    /// Returns `false` if the charger is unknown
    pub fn set_active(&self, charger_id: &ChargerId, active: bool) -> bool {
        let mut chargers = self.chargers.write().unwrap_or_else(|e| e.into_inner());
        match chargers.get_mut(charger_id) {
            Some(info) => {
                info.active = active;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.chargers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProviderRegistry for StaticProviderRegistry {
    fn info(&self, charger_id: &ChargerId) -> Option<ChargerInfo> {
        let chargers = self.chargers.read().unwrap_or_else(|e| e.into_inner());
        chargers.get(charger_id).cloned()
    }
}

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<AccountId, Amount>,
    /// Standing authorizations granted to the escrow
    allowances: HashMap<AccountId, Amount>,
    /// Next pre-authorization nonce expected per owner
    nonces: HashMap<AccountId, u64>,
    frozen: HashSet<AccountId>,
    escrow: Amount,
}

impl Book {
    fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, account: &AccountId) -> Amount {
        self.allowances.get(account).copied().unwrap_or(0)
    }

    fn nonce(&self, account: &AccountId) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    fn ensure_not_frozen(&self, account: &AccountId) -> LedgerResult<()> {
        if self.frozen.contains(account) {
            return Err(LedgerError::AccountFrozen(account.clone()));
        }
        Ok(())
    }

    fn check_pre_authorization(
        &self,
        payer: &AccountId,
        auth: &PreAuthorization,
    ) -> LedgerResult<()> {
        if &auth.owner != payer {
            return Err(LedgerError::InvalidPreAuthorization(format!(
                "signed by {}, payer is {}",
                auth.owner, payer
            )));
        }
        if auth.deadline < escrow_util::now() {
            return Err(LedgerError::InvalidPreAuthorization("expired".into()));
        }
        let expected = self.nonce(payer);
        if auth.nonce != expected {
            return Err(LedgerError::InvalidPreAuthorization(format!(
                "nonce {} does not match expected {}",
                auth.nonce, expected
            )));
        }
        if auth.signature.is_empty() {
            return Err(LedgerError::InvalidPreAuthorization("missing signature".into()));
        }
        Ok(())
    }
}

/// Single-process ledger holding participant balances and the escrow pool.
///
/// Every operation runs under one lock and checks all conditions before
/// touching any balance, so a failed call leaves the book unchanged.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    book: Mutex<Book>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> LedgerResult<MutexGuard<'_, Book>> {
        self.book
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".into()))
    }

    /// Credit an account from outside the escrow (minting for tests and seeding)
    pub fn fund(&self, account: &AccountId, amount: Amount) -> LedgerResult<()> {
        let mut book = self.book()?;
        let balance = book
            .balance(account)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        book.balances.insert(account.clone(), balance);
        Ok(())
    }

    /// Set the standing authorization `owner` grants the escrow
    pub fn approve(&self, owner: &AccountId, amount: Amount) -> LedgerResult<()> {
        let mut book = self.book()?;
        book.allowances.insert(owner.clone(), amount);
        Ok(())
    }

    pub fn freeze(&self, account: &AccountId) -> LedgerResult<()> {
        self.book()?.frozen.insert(account.clone());
        Ok(())
    }

    pub fn unfreeze(&self, account: &AccountId) -> LedgerResult<()> {
        self.book()?.frozen.remove(account);
        Ok(())
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.book().map(|b| b.balance(account)).unwrap_or(0)
    }

    pub fn allowance_of(&self, account: &AccountId) -> Amount {
        self.book().map(|b| b.allowance(account)).unwrap_or(0)
    }

    /// Nonce the next pre-authorization from `owner` must carry
    pub fn next_nonce(&self, owner: &AccountId) -> u64 {
        self.book().map(|b| b.nonce(owner)).unwrap_or(0)
    }

    /// Total value currently held in escrow
    pub fn escrow_balance(&self) -> Amount {
        self.book().map(|b| b.escrow).unwrap_or(0)
    }
}

impl LedgerGateway for MemoryLedger {
    fn transfer_in(
        &self,
        payer: &AccountId,
        amount: Amount,
        pre_authorization: Option<&PreAuthorization>,
    ) -> LedgerResult<()> {
        let mut book = self.book()?;
        book.ensure_not_frozen(payer)?;

        let approved = match pre_authorization {
            Some(auth) => {
                book.check_pre_authorization(payer, auth)?;
                auth.amount
            }
            None => book.allowance(payer),
        };
        if approved < amount {
            return Err(LedgerError::InsufficientAuthorization {
                account: payer.clone(),
                needed: amount,
                approved,
            });
        }

        let available = book.balance(payer);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: payer.clone(),
                needed: amount,
                available,
            });
        }
        let escrow = book.escrow.checked_add(amount).ok_or(LedgerError::Overflow)?;

        if pre_authorization.is_some() {
            let next = book.nonce(payer) + 1;
            book.nonces.insert(payer.clone(), next);
        }
        book.allowances.insert(payer.clone(), approved - amount);
        book.balances.insert(payer.clone(), available - amount);
        book.escrow = escrow;

        debug!(payer = %payer, amount, escrow, "Transferred into escrow");
        Ok(())
    }

    fn payout(&self, payouts: &[Payout]) -> LedgerResult<()> {
        let mut book = self.book()?;

        let mut total: Amount = 0;
        let mut credited: HashMap<AccountId, Amount> = HashMap::new();
        for leg in payouts {
            book.ensure_not_frozen(&leg.recipient)?;
            total = total.checked_add(leg.amount).ok_or(LedgerError::Overflow)?;
            let current = match credited.get(&leg.recipient) {
                Some(pending) => *pending,
                None => book.balance(&leg.recipient),
            };
            let next = current.checked_add(leg.amount).ok_or(LedgerError::Overflow)?;
            credited.insert(leg.recipient.clone(), next);
        }

        if total > book.escrow {
            return Err(LedgerError::Unavailable(format!(
                "escrow holds {}, payout needs {}",
                book.escrow, total
            )));
        }

        book.escrow -= total;
        for (recipient, balance) in credited {
            book.balances.insert(recipient, balance);
        }

        debug!(legs = payouts.len(), total, "Paid out of escrow");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn bob() -> AccountId {
        AccountId::new("bob")
    }

    fn funded_ledger() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.fund(&alice(), 100).unwrap();
        ledger.approve(&alice(), 100).unwrap();
        ledger
    }

    fn permit(owner: AccountId, amount: Amount, nonce: u64) -> PreAuthorization {
        PreAuthorization {
            owner,
            amount,
            deadline: escrow_util::now() + Duration::hours(1),
            nonce,
            signature: "sig".into(),
        }
    }

    #[test]
    fn registries_resolve_registered_entries() {
        let identities = StaticIdentityRegistry::new();
        identities.register(VehicleRef::new("VIN-1"), alice());
        assert_eq!(identities.owner_of(&VehicleRef::new("VIN-1")), Some(alice()));
        assert_eq!(identities.owner_of(&VehicleRef::new("VIN-2")), None);

        let providers = StaticProviderRegistry::new();
        providers.register(ChargerId::new("CH-1"), bob(), true);
        assert!(providers.set_active(&ChargerId::new("CH-1"), false));
        assert!(!providers.set_active(&ChargerId::new("CH-9"), false));
        let info = providers.info(&ChargerId::new("CH-1")).unwrap();
        assert_eq!(info.owner, bob());
        assert!(!info.active);
    }

    #[test]
    fn transfer_in_moves_balance_to_escrow() {
        let ledger = funded_ledger();

        ledger.transfer_in(&alice(), 40, None).unwrap();

        assert_eq!(ledger.balance_of(&alice()), 60);
        assert_eq!(ledger.allowance_of(&alice()), 60);
        assert_eq!(ledger.escrow_balance(), 40);
    }

    #[test]
    fn transfer_in_requires_allowance() {
        let ledger = MemoryLedger::new();
        ledger.fund(&alice(), 100).unwrap();

        let err = ledger.transfer_in(&alice(), 10, None).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAuthorization { .. }));
        assert_eq!(ledger.balance_of(&alice()), 100);
    }

    #[test]
    fn transfer_in_requires_balance() {
        let ledger = MemoryLedger::new();
        ledger.fund(&alice(), 5).unwrap();
        ledger.approve(&alice(), 100).unwrap();

        let err = ledger.transfer_in(&alice(), 10, None).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { available: 5, .. }));
        assert_eq!(ledger.allowance_of(&alice()), 100);
        assert_eq!(ledger.escrow_balance(), 0);
    }

    #[test]
    fn pre_authorization_replaces_allowance() {
        let ledger = MemoryLedger::new();
        ledger.fund(&alice(), 100).unwrap();

        ledger
            .transfer_in(&alice(), 30, Some(&permit(alice(), 30, 0)))
            .unwrap();
        assert_eq!(ledger.escrow_balance(), 30);
        assert_eq!(ledger.next_nonce(&alice()), 1);

        // Replaying the same nonce is rejected
        let err = ledger
            .transfer_in(&alice(), 30, Some(&permit(alice(), 30, 0)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPreAuthorization(_)));
    }

    #[test]
    fn pre_authorization_for_another_owner_is_rejected() {
        let ledger = MemoryLedger::new();
        ledger.fund(&alice(), 100).unwrap();

        let err = ledger
            .transfer_in(&alice(), 30, Some(&permit(bob(), 30, 0)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPreAuthorization(_)));
        assert_eq!(ledger.next_nonce(&alice()), 0);
    }

    #[test]
    fn failed_transfer_does_not_consume_nonce() {
        let ledger = MemoryLedger::new();
        ledger.fund(&alice(), 10).unwrap();

        let err = ledger
            .transfer_in(&alice(), 30, Some(&permit(alice(), 30, 0)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.next_nonce(&alice()), 0);
    }

    #[test]
    fn payout_is_all_or_nothing() {
        let ledger = funded_ledger();
        ledger.transfer_in(&alice(), 50, None).unwrap();
        ledger.freeze(&bob()).unwrap();

        let err = ledger
            .payout(&[Payout::new(alice(), 20), Payout::new(bob(), 30)])
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountFrozen(bob()));
        assert_eq!(ledger.balance_of(&alice()), 50);
        assert_eq!(ledger.escrow_balance(), 50);

        ledger.unfreeze(&bob()).unwrap();
        ledger
            .payout(&[Payout::new(alice(), 20), Payout::new(bob(), 30)])
            .unwrap();
        assert_eq!(ledger.balance_of(&alice()), 70);
        assert_eq!(ledger.balance_of(&bob()), 30);
        assert_eq!(ledger.escrow_balance(), 0);
    }

    #[test]
    fn payout_cannot_exceed_escrow() {
        let ledger = funded_ledger();
        ledger.transfer_in(&alice(), 10, None).unwrap();

        assert!(ledger.transfer_out(&bob(), 11).is_err());
        assert_eq!(ledger.escrow_balance(), 10);
    }

    #[test]
    fn payout_to_same_recipient_twice_accumulates() {
        let ledger = funded_ledger();
        ledger.transfer_in(&alice(), 10, None).unwrap();

        ledger
            .payout(&[Payout::new(bob(), 4), Payout::new(bob(), 6)])
            .unwrap();
        assert_eq!(ledger.balance_of(&bob()), 10);
    }
}
