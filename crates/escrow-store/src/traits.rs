//! Store trait definitions

use escrow_api::{Params, Session, SessionFilter};
use escrow_util::{AccountId, ChargerId, SessionId};

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Parameters

    /// Current parameters, or `None` if never saved
    fn load_params(&self) -> StoreResult<Option<Params>>;

    fn save_params(&self, params: &Params) -> StoreResult<()>;

    // Trust relation

    fn is_trusted(&self, driver: &AccountId, charger_id: &ChargerId) -> StoreResult<bool>;

    fn set_trusted(
        &self,
        driver: &AccountId,
        charger_id: &ChargerId,
        trusted: bool,
    ) -> StoreResult<()>;

    // Sessions

    /// Id the next inserted session should take: one past the highest stored id
    fn next_session_id(&self) -> StoreResult<SessionId>;

    /// Insert a new session; fails if the id is taken
    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    /// Overwrite an existing session; fails with `NotFound` if absent
    fn update_session(&self, session: &Session) -> StoreResult<()>;

    fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// Sessions matching `filter` in id order
    fn list_sessions(
        &self,
        filter: &SessionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Session>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
