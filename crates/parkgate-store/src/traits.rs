//! Store trait definitions

use chrono::{DateTime, Local};
use parkgate_api::{Amount, ImageRef, VehicleSession};
use parkgate_util::{IdentifierToken, PaymentMethodId, SessionId, TicketNumber, VehicleTypeId};
use std::time::Instant;

use crate::{AuditEvent, StoreResult};

/// Data recorded when a vehicle enters
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub identifier: IdentifierToken,
    pub vehicle_type_id: VehicleTypeId,
    pub entry_time: DateTime<Local>,
    pub entry_image_ref: ImageRef,
    pub ticket_number: TicketNumber,

    /// Roll back instead of committing once this has passed
    pub deadline: Option<Instant>,
}

/// Data recorded when a vehicle leaves
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub identifier: IdentifierToken,
    pub exit_time: DateTime<Local>,
    pub exit_image_ref: ImageRef,
    pub payment_method_id: PaymentMethodId,

    /// Roll back instead of committing once this has passed
    pub deadline: Option<Instant>,
}

/// Session storage
pub trait SessionStore: Send + Sync {
    // Sessions

    /// Create an active session.
    ///
    /// Fails with [`StoreError::Constraint`](crate::StoreError::Constraint) if
    /// the identifier already has an active session, and with
    /// [`StoreError::DeadlineExceeded`](crate::StoreError::DeadlineExceeded)
    /// (nothing written) if `entry.deadline` passes before commit.
    fn insert_entry(&self, entry: &NewEntry) -> StoreResult<SessionId>;

    /// Find the most recent active session for the identifier and close it,
    /// all in one transaction.
    ///
    /// `fee` is evaluated on the open session inside the transaction. Of two
    /// racing calls for the same identifier exactly one succeeds; the other
    /// gets [`StoreError::NotFound`](crate::StoreError::NotFound). If
    /// `request.deadline` passes before commit the close is rolled back and
    /// [`StoreError::DeadlineExceeded`](crate::StoreError::DeadlineExceeded)
    /// is returned.
    fn close_open_session(
        &self,
        request: &CloseRequest,
        fee: &dyn Fn(&VehicleSession) -> Amount,
    ) -> StoreResult<VehicleSession>;

    /// All active sessions, oldest entry first
    fn get_active_sessions(&self) -> StoreResult<Vec<VehicleSession>>;

    /// Look up a session by id
    fn get_session(&self, id: SessionId) -> StoreResult<Option<VehicleSession>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
