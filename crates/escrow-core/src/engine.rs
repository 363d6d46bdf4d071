//! Core escrow engine

use chrono::{DateTime, Utc};
use escrow_api::{Amount, Params, PreAuthorization, Session, SessionFilter, SessionState};
use escrow_gateway::{ChargerInfo, IdentityRegistry, LedgerGateway, ProviderRegistry};
use escrow_store::{AuditEvent, AuditEventType, Store, StoreError};
use escrow_util::{has_elapsed, AccountId, ChargerId, SessionId, VehicleRef};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    advance, require_state, settlement_payouts, CoreEvent, EscrowError, EscrowResult,
    SessionLocks,
};

/// External services the engine consults
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityRegistry>,
    pub providers: Arc<dyn ProviderRegistry>,
    pub ledger: Arc<dyn LedgerGateway>,
}

/// Deposit and placement for a new session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub vehicle_ref: VehicleRef,
    pub charger_id: ChargerId,
    pub deposit: Amount,
    /// Forwarded to the ledger untouched
    pub pre_authorization: Option<PreAuthorization>,
}

/// A session after a successful operation, with the event it produced
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub session: Session,
    pub event: CoreEvent,
}

/// Participants of a session about to be opened
struct Parties {
    driver: AccountId,
    payer: AccountId,
    sponsor: Option<AccountId>,
}

/// The escrow engine
///
/// Every operation validates all of its guards, then calls the ledger, then
/// commits to the store. Operations on one session are serialized; different
/// sessions proceed independently.
pub struct EscrowEngine {
    store: Arc<dyn Store>,
    identities: Arc<dyn IdentityRegistry>,
    providers: Arc<dyn ProviderRegistry>,
    ledger: Arc<dyn LedgerGateway>,
    admin: AccountId,
    locks: SessionLocks,
    /// Held from id selection through insert
    allocation: Mutex<()>,
}

impl EscrowEngine {
    /// Create a new engine.
    ///
    /// `initial_params` seed an empty store; parameters already stored win.
    pub fn new(
        store: Arc<dyn Store>,
        collaborators: Collaborators,
        admin: AccountId,
        initial_params: Params,
    ) -> EscrowResult<Self> {
        match store.load_params()? {
            Some(params) => {
                info!(?params, "Using stored escrow parameters");
            }
            None => {
                validate_params(&initial_params)?;
                store.save_params(&initial_params)?;
                info!(params = ?initial_params, "Seeded escrow parameters");
            }
        }

        info!(admin = %admin, "Escrow engine initialized");

        Ok(Self {
            store,
            identities: collaborators.identities,
            providers: collaborators.providers,
            ledger: collaborators.ledger,
            admin,
            locks: SessionLocks::new(),
            allocation: Mutex::new(()),
        })
    }

    pub fn admin(&self) -> &AccountId {
        &self.admin
    }

    /// Whether the store and ledger both respond
    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy() && self.ledger.is_healthy()
    }

    // Queries

    pub fn get_params(&self) -> EscrowResult<Params> {
        self.store
            .load_params()?
            .ok_or_else(|| StoreError::NotFound("escrow parameters".into()).into())
    }

    pub fn get_session(&self, id: SessionId) -> EscrowResult<Session> {
        self.store
            .get_session(id)?
            .ok_or(EscrowError::SessionNotFound(id))
    }

    pub fn list_sessions(
        &self,
        filter: &SessionFilter,
        limit: Option<usize>,
    ) -> EscrowResult<Vec<Session>> {
        Ok(self.store.list_sessions(filter, limit)?)
    }

    pub fn is_trusted(&self, driver: &AccountId, charger_id: &ChargerId) -> EscrowResult<bool> {
        Ok(self.store.is_trusted(driver, charger_id)?)
    }

    // Creation

    /// Open a session funded by the caller for the vehicle's registered owner.
    ///
    /// A declared sponsor must be the caller.
    pub fn create_session(
        &self,
        caller: &AccountId,
        request: SessionRequest,
        sponsor: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        let (registrant, _charger) = self.resolve(&request)?;

        if let Some(sponsor) = &sponsor {
            if sponsor != caller {
                return Err(EscrowError::NotSponsor {
                    caller: caller.clone(),
                    sponsor: sponsor.clone(),
                });
            }
        }

        let params = self.check_deposit(request.deposit)?;

        let parties = Parties {
            driver: registrant,
            payer: caller.clone(),
            sponsor,
        };
        self.open(parties, request, params.refund_timeout, now)
    }

    /// Open a session on behalf of a driver who has trusted this charger.
    ///
    /// The caller must own the charger; the payer becomes the driver.
    pub fn create_session_by_charger(
        &self,
        caller: &AccountId,
        payer: AccountId,
        request: SessionRequest,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        let (registrant, charger) = self.resolve(&request)?;
        ensure_charger_owner(caller, &request.charger_id, &charger)?;

        if !self.store.is_trusted(&payer, &request.charger_id)? {
            return Err(EscrowError::NotTrusted {
                driver: payer,
                charger_id: request.charger_id,
            });
        }

        let params = self.check_deposit(request.deposit)?;
        log_registrant_mismatch(&registrant, &payer, &request.vehicle_ref);

        let parties = Parties {
            driver: payer.clone(),
            payer,
            sponsor: None,
        };
        self.open(parties, request, params.refund_timeout, now)
    }

    /// Open a session billed to a guest payer, without a trust check
    pub fn create_guest_session(
        &self,
        caller: &AccountId,
        payer: AccountId,
        request: SessionRequest,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        let (registrant, charger) = self.resolve(&request)?;
        ensure_charger_owner(caller, &request.charger_id, &charger)?;
        let params = self.check_deposit(request.deposit)?;
        log_registrant_mismatch(&registrant, &payer, &request.vehicle_ref);

        let parties = Parties {
            driver: payer.clone(),
            payer,
            sponsor: None,
        };
        self.open(parties, request, params.refund_timeout, now)
    }

    // Lifecycle

    /// Top up an active session from the caller's funds
    pub fn add_deposit(
        &self,
        caller: &AccountId,
        id: SessionId,
        amount: Amount,
        pre_authorization: Option<&PreAuthorization>,
    ) -> EscrowResult<SessionUpdate> {
        self.with_session(id, |mut session| {
            require_state(&session, SessionState::Active, "deposits need an active session")?;

            let params = self.get_params()?;
            if amount == 0 {
                return Err(EscrowError::OutOfBounds("deposit must be positive".into()));
            }
            let reserved = session
                .reserved
                .checked_add(amount)
                .filter(|total| *total <= params.max_deposit)
                .ok_or_else(|| {
                    EscrowError::OutOfBounds(format!(
                        "reserve of {} plus {} exceeds max deposit {}",
                        session.reserved, amount, params.max_deposit
                    ))
                })?;

            self.ledger.transfer_in(caller, amount, pre_authorization)?;

            session.reserved = reserved;
            self.commit_after_transfer(&session)?;

            self.audit(AuditEventType::DepositAdded {
                session_id: id,
                payer: caller.clone(),
                amount,
                reserved,
            });
            info!(session_id = %id, amount, reserved, "Deposit added");

            Ok(SessionUpdate {
                session,
                event: CoreEvent::DepositAdded {
                    session_id: id,
                    payer: caller.clone(),
                    amount,
                },
            })
        })
    }

    /// Charger owner ends the session and declares the charge
    pub fn end_and_propose(
        &self,
        caller: &AccountId,
        id: SessionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        self.with_session(id, |mut session| {
            let owner = self.providers.info(&session.charger_id).map(|c| c.owner);
            if owner.as_ref() != Some(caller) {
                return Err(EscrowError::NotChargerOwner {
                    caller: caller.clone(),
                    charger_id: session.charger_id.clone(),
                });
            }

            require_state(&session, SessionState::Active, "only active sessions can be proposed")?;

            if amount > session.reserved {
                return Err(EscrowError::OutOfBounds(format!(
                    "charge {} exceeds reserve {}",
                    amount, session.reserved
                )));
            }

            advance(&mut session, SessionState::Proposed)?;
            session.proposed = Some(amount);
            session.propose_ts = Some(now);
            self.store.update_session(&session)?;

            self.audit(AuditEventType::ChargeProposed {
                session_id: id,
                amount,
            });
            info!(session_id = %id, amount, reserved = session.reserved, "Charge proposed");

            Ok(SessionUpdate {
                session,
                event: CoreEvent::ChargeProposed {
                    session_id: id,
                    amount,
                },
            })
        })
    }

    /// Driver contests the proposed charge while the window is open
    pub fn dispute(
        &self,
        caller: &AccountId,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        self.with_session(id, |mut session| {
            if &session.driver != caller {
                return Err(EscrowError::NotDriver {
                    caller: caller.clone(),
                });
            }

            require_state(&session, SessionState::Proposed, "only proposed charges can be disputed")?;

            let (_, proposed_at) = proposal(&session)?;
            if has_elapsed(proposed_at, session.refund_timeout, now) {
                return Err(EscrowError::BadState {
                    session_id: id,
                    state: session.state,
                    reason: "dispute window has closed",
                });
            }

            advance(&mut session, SessionState::Disputed)?;
            self.store.update_session(&session)?;

            self.audit(AuditEventType::Disputed { session_id: id });
            info!(session_id = %id, "Charge disputed");

            Ok(SessionUpdate {
                session,
                event: CoreEvent::Disputed { session_id: id },
            })
        })
    }

    /// Settle an undisputed proposal once the window has closed. Anyone may call.
    pub fn finalize_if_no_dispute(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        self.with_session(id, |session| {
            require_state(&session, SessionState::Proposed, "only proposed charges can be finalized")?;

            let (charge, proposed_at) = proposal(&session)?;
            if !has_elapsed(proposed_at, session.refund_timeout, now) {
                return Err(EscrowError::BadState {
                    session_id: id,
                    state: session.state,
                    reason: "dispute window is still open",
                });
            }

            let refund = session.reserved.checked_sub(charge).ok_or_else(|| {
                EscrowError::OutOfBounds(format!(
                    "charge {} exceeds reserve {}",
                    charge, session.reserved
                ))
            })?;

            self.settle(session, refund, charge, None)
        })
    }

    /// Return the whole reserve of a session that was never proposed. Anyone may call.
    pub fn refund_if_stale(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        self.with_session(id, |mut session| {
            require_state(&session, SessionState::Active, "only active sessions can be refunded")?;

            if !has_elapsed(session.start_ts, session.refund_timeout, now) {
                return Err(EscrowError::BadState {
                    session_id: id,
                    state: session.state,
                    reason: "refund timeout has not passed",
                });
            }

            let amount = session.reserved;
            self.ledger.transfer_out(&session.driver, amount)?;

            advance(&mut session, SessionState::Refunded)?;
            self.commit_after_transfer(&session)?;

            self.audit(AuditEventType::Refunded {
                session_id: id,
                driver: session.driver.clone(),
                amount,
            });
            info!(session_id = %id, driver = %session.driver, amount, "Stale session refunded");

            Ok(SessionUpdate {
                session,
                event: CoreEvent::Refunded {
                    session_id: id,
                    amount,
                },
            })
        })
    }

    /// Admin splits a disputed reserve between driver and charger owner
    pub fn resolve_dispute(
        &self,
        caller: &AccountId,
        id: SessionId,
        driver_amount: Amount,
        charger_amount: Amount,
    ) -> EscrowResult<SessionUpdate> {
        self.with_session(id, |session| {
            if caller != &self.admin {
                return Err(EscrowError::NotAdmin {
                    caller: caller.clone(),
                });
            }

            require_state(&session, SessionState::Disputed, "only disputed sessions can be resolved")?;

            if driver_amount.checked_add(charger_amount) != Some(session.reserved) {
                return Err(EscrowError::OutOfBounds(format!(
                    "split {} + {} does not equal reserve {}",
                    driver_amount, charger_amount, session.reserved
                )));
            }

            self.settle(session, driver_amount, charger_amount, Some(caller.clone()))
        })
    }

    // Trust and parameters

    /// Driver grants or revokes a charger's right to open sessions on their behalf
    pub fn set_trusted_charger(
        &self,
        caller: &AccountId,
        driver: &AccountId,
        charger_id: &ChargerId,
        trusted: bool,
    ) -> EscrowResult<CoreEvent> {
        if caller != driver {
            return Err(EscrowError::NotDriver {
                caller: caller.clone(),
            });
        }

        self.store.set_trusted(driver, charger_id, trusted)?;

        self.audit(AuditEventType::TrustedChargerSet {
            driver: driver.clone(),
            charger_id: charger_id.clone(),
            trusted,
        });
        info!(driver = %driver, charger_id = %charger_id, trusted, "Trusted charger set");

        Ok(CoreEvent::TrustedChargerSet {
            driver: driver.clone(),
            charger_id: charger_id.clone(),
            trusted,
        })
    }

    /// Replace the parameters used by future operations
    pub fn update_params(&self, caller: &AccountId, params: Params) -> EscrowResult<CoreEvent> {
        if caller != &self.admin {
            return Err(EscrowError::NotAdmin {
                caller: caller.clone(),
            });
        }

        validate_params(&params)?;
        self.store.save_params(&params)?;

        self.audit(AuditEventType::ParamsUpdated {
            min_deposit: params.min_deposit,
            max_deposit: params.max_deposit,
            refund_timeout: params.refund_timeout,
        });
        info!(?params, "Escrow parameters updated");

        Ok(CoreEvent::ParamsUpdated(params))
    }

    // Internals

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(Session) -> EscrowResult<T>,
    ) -> EscrowResult<T> {
        self.locks.with_lock(id, || {
            let session = self.get_session(id)?;
            f(session)
        })
    }

    /// Look up the vehicle's registrant and an active charger
    fn resolve(&self, request: &SessionRequest) -> EscrowResult<(AccountId, ChargerInfo)> {
        let registrant = self.identities.owner_of(&request.vehicle_ref).ok_or_else(|| {
            EscrowError::NotRegistered(format!("vehicle {}", request.vehicle_ref))
        })?;

        let charger = match self.providers.info(&request.charger_id) {
            Some(charger) if charger.active => charger,
            Some(_) => {
                return Err(EscrowError::NotRegistered(format!(
                    "charger {} is inactive",
                    request.charger_id
                )));
            }
            None => {
                return Err(EscrowError::NotRegistered(format!(
                    "charger {}",
                    request.charger_id
                )));
            }
        };

        Ok((registrant, charger))
    }

    /// Parameters in force, once the deposit is known to fit them
    fn check_deposit(&self, deposit: Amount) -> EscrowResult<Params> {
        let params = self.get_params()?;
        if !params.deposit_in_bounds(deposit) {
            return Err(EscrowError::OutOfBounds(format!(
                "deposit {} outside {}..={}",
                deposit, params.min_deposit, params.max_deposit
            )));
        }
        Ok(params)
    }

    fn open(
        &self,
        parties: Parties,
        request: SessionRequest,
        refund_timeout: Duration,
        now: DateTime<Utc>,
    ) -> EscrowResult<SessionUpdate> {
        let _allocation = self
            .allocation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let id = self.store.next_session_id()?;

        self.ledger.transfer_in(
            &parties.payer,
            request.deposit,
            request.pre_authorization.as_ref(),
        )?;

        let session = Session {
            id,
            driver: parties.driver,
            sponsor: parties.sponsor,
            vehicle_ref: request.vehicle_ref,
            charger_id: request.charger_id,
            reserved: request.deposit,
            proposed: None,
            state: SessionState::Active,
            start_ts: now,
            propose_ts: None,
            refund_timeout,
        };

        if let Err(e) = self.store.insert_session(&session) {
            error!(
                session_id = %id,
                payer = %parties.payer,
                amount = request.deposit,
                error = %e,
                "Deposit taken but session insert failed"
            );
            return Err(e.into());
        }

        self.audit(AuditEventType::SessionCreated {
            session_id: id,
            driver: session.driver.clone(),
            payer: parties.payer.clone(),
            charger_id: session.charger_id.clone(),
            reserved: session.reserved,
        });
        info!(
            session_id = %id,
            driver = %session.driver,
            payer = %parties.payer,
            charger_id = %session.charger_id,
            reserved = session.reserved,
            "Session created"
        );

        let event = CoreEvent::SessionCreated {
            session_id: id,
            driver: session.driver.clone(),
            payer: parties.payer,
            sponsor: session.sponsor.clone(),
            vehicle_ref: session.vehicle_ref.clone(),
            charger_id: session.charger_id.clone(),
            reserved: session.reserved,
        };

        Ok(SessionUpdate { session, event })
    }

    /// Pay both legs in one batch and mark the session settled
    fn settle(
        &self,
        mut session: Session,
        driver_amount: Amount,
        charger_amount: Amount,
        resolved_by: Option<AccountId>,
    ) -> EscrowResult<SessionUpdate> {
        let id = session.id;
        let charger_owner = self
            .providers
            .info(&session.charger_id)
            .map(|c| c.owner)
            .ok_or_else(|| {
                EscrowError::NotRegistered(format!("charger {}", session.charger_id))
            })?;

        self.ledger.payout(&settlement_payouts(
            &session.driver,
            driver_amount,
            &charger_owner,
            charger_amount,
        ))?;

        advance(&mut session, SessionState::Settled)?;
        self.commit_after_transfer(&session)?;

        self.audit(AuditEventType::Settled {
            session_id: id,
            driver_amount,
            charger_recipient: charger_owner.clone(),
            charger_amount,
            resolved_by: resolved_by.clone(),
        });
        info!(
            session_id = %id,
            driver_amount,
            charger_amount,
            resolved_by = ?resolved_by,
            "Session settled"
        );

        Ok(SessionUpdate {
            session,
            event: CoreEvent::Settled {
                session_id: id,
                driver_amount,
                charger_recipient: charger_owner,
                charger_amount,
            },
        })
    }

    /// Persist a session whose funds already moved
    fn commit_after_transfer(&self, session: &Session) -> EscrowResult<()> {
        self.store.update_session(session).map_err(|e| {
            error!(
                session_id = %session.id,
                state = %session.state,
                reserved = session.reserved,
                error = %e,
                "Ledger transfer completed but session commit failed"
            );
            e.into()
        })
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

fn validate_params(params: &Params) -> EscrowResult<()> {
    if params.max_deposit == 0 {
        return Err(EscrowError::OutOfBounds("max deposit must be positive".into()));
    }
    if params.min_deposit > params.max_deposit {
        return Err(EscrowError::OutOfBounds(format!(
            "min deposit {} exceeds max deposit {}",
            params.min_deposit, params.max_deposit
        )));
    }
    if params.refund_timeout.is_zero() {
        return Err(EscrowError::OutOfBounds(
            "refund timeout must be positive".into(),
        ));
    }
    // Stored as SQLite INTEGER
    let limit = i64::MAX as u64;
    if params.max_deposit > limit || params.refund_timeout.as_secs() > limit {
        return Err(EscrowError::OutOfBounds(
            "max deposit and refund timeout must fit a signed 64-bit integer".into(),
        ));
    }
    Ok(())
}

fn ensure_charger_owner(
    caller: &AccountId,
    charger_id: &ChargerId,
    charger: &ChargerInfo,
) -> EscrowResult<()> {
    if &charger.owner != caller {
        return Err(EscrowError::NotChargerOwner {
            caller: caller.clone(),
            charger_id: charger_id.clone(),
        });
    }
    Ok(())
}

/// Proposed charge and proposal time of a proposed or disputed session
fn proposal(session: &Session) -> EscrowResult<(Amount, DateTime<Utc>)> {
    match (session.proposed, session.propose_ts) {
        (Some(amount), Some(at)) => Ok((amount, at)),
        _ => Err(EscrowError::BadState {
            session_id: session.id,
            state: session.state,
            reason: "no charge has been proposed",
        }),
    }
}

fn log_registrant_mismatch(registrant: &AccountId, payer: &AccountId, vehicle_ref: &VehicleRef) {
    if registrant != payer {
        debug!(
            vehicle_ref = %vehicle_ref,
            registrant = %registrant,
            payer = %payer,
            "Charger-initiated session billed to someone other than the registrant"
        );
    }
}
