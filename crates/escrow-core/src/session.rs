//! Session transitions and per-session serialization

use escrow_api::{Amount, Session, SessionState};
use escrow_gateway::Payout;
use escrow_util::{AccountId, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{EscrowError, EscrowResult};

/// Fail with `BadState` unless the session is in `expected`
pub fn require_state(
    session: &Session,
    expected: SessionState,
    reason: &'static str,
) -> EscrowResult<()> {
    if session.state != expected {
        return Err(EscrowError::BadState {
            session_id: session.id,
            state: session.state,
            reason,
        });
    }
    Ok(())
}

/// Move a session along one edge of the lifecycle graph
pub fn advance(session: &mut Session, next: SessionState) -> EscrowResult<()> {
    if !session.state.can_transition_to(next) {
        return Err(EscrowError::BadState {
            session_id: session.id,
            state: session.state,
            reason: "transition not allowed",
        });
    }
    session.state = next;
    Ok(())
}

/// Payout legs for a settlement, skipping zero amounts
pub fn settlement_payouts(
    driver: &AccountId,
    driver_amount: Amount,
    charger_owner: &AccountId,
    charger_amount: Amount,
) -> Vec<Payout> {
    [
        (driver, driver_amount),
        (charger_owner, charger_amount),
    ]
    .into_iter()
    .filter(|(_, amount)| *amount > 0)
    .map(|(recipient, amount)| Payout::new(recipient.clone(), amount))
    .collect()
}

/// One mutex per session id.
///
/// Holding the lock for a session serializes every read-modify-write on it.
/// Sessions on different ids never contend. An entry lives only while some
/// operation holds or waits on it.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drop the entry unless another operation still holds a handle to it
    fn release(&self, id: SessionId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One handle in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
    }

    /// Run `f` while no other operation holds `id`
    pub fn with_lock<T>(&self, id: SessionId, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(id);
        let result = {
            // The mutex guards no data, so a poisoned lock is still usable
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(id, lock);
        result
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
