//! Entry recorder

use chrono::SubsecRound;
use parkgate_api::{BroadcastMessage, CallerIdentity, Lane, SessionStatus, VEHICLE_ENTRY, VehicleSession};
use parkgate_hub::PublishReport;
use parkgate_store::{AuditEventType, NewEntry};
use parkgate_util::{TicketNumber, VehicleTypeId};
use tracing::{error, info, warn};

use crate::{
    CoreEvent, PipelineContext, PipelineError, PipelineErrorKind, PipelineStage, PipelineState,
    StateTrace,
};

/// One entry as reported by the lane
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub raw_token: String,
    pub vehicle_type_id: Option<VehicleTypeId>,
    pub caller: CallerIdentity,
}

/// A recorded entry
#[derive(Debug, Clone)]
pub struct EntryReceipt {
    pub session: VehicleSession,
    pub broadcast: PublishReport,
    pub trace: Vec<PipelineState>,
}

/// Opens a session for an arriving vehicle
#[derive(Clone)]
pub struct EntryRecorder {
    ctx: PipelineContext,
}

impl EntryRecorder {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn record_entry(&self, request: EntryRequest) -> Result<EntryReceipt, PipelineError> {
        let mut trace = StateTrace::new(Lane::Entry);

        let identifier = match self.ctx.matcher.validate(&request.raw_token) {
            Ok(identifier) => identifier,
            Err(e) => {
                return Err(self
                    .abort(&request, trace, PipelineStage::Validate, e.into(), None)
                    .await);
            }
        };
        trace.advance(PipelineState::Validated);

        let entry_image_ref = match self.ctx.hardware.capture_image(Lane::Entry).await {
            Ok(image) => image,
            Err(e) => {
                return Err(self
                    .abort(&request, trace, PipelineStage::CaptureImage, e.into(), None)
                    .await);
            }
        };

        // Stored with millisecond precision
        let entry_time = parkgate_util::now().trunc_subsecs(3);
        let entry = NewEntry {
            identifier,
            vehicle_type_id: request
                .vehicle_type_id
                .unwrap_or(self.ctx.settings.default_vehicle_type),
            entry_time,
            entry_image_ref,
            ticket_number: TicketNumber::generate(&entry_time),
            deadline: None,
        };

        let mut insert = entry.clone();
        let id = match self
            .ctx
            .store_call(move |store, deadline| {
                insert.deadline = Some(deadline);
                store.insert_entry(&insert)
            })
            .await
        {
            Ok(id) => id,
            Err(kind) => {
                return Err(self
                    .abort(&request, trace, PipelineStage::RecordEntry, kind, None)
                    .await);
            }
        };
        trace.advance(PipelineState::Persisted);

        let session = VehicleSession {
            id,
            identifier: entry.identifier,
            vehicle_type_id: entry.vehicle_type_id,
            entry_time: entry.entry_time,
            exit_time: None,
            entry_image_ref: entry.entry_image_ref,
            exit_image_ref: None,
            fee: None,
            payment_method_id: None,
            ticket_number: entry.ticket_number,
            status: SessionStatus::Active,
        };

        if let Err(e) = self.ctx.hardware.open_gate_barrier(Lane::Entry).await {
            error!(
                session_id = %session.id,
                identifier = %session.identifier,
                error = %e,
                "Entry gate failed after session was opened"
            );
            self.ctx
                .audit(AuditEventType::GateFailed {
                    lane: Lane::Entry,
                    session_id: session.id,
                    identifier: session.identifier.clone(),
                    reason: e.to_string(),
                    caller: request.caller.to_string(),
                })
                .await;
            return Err(self
                .abort(&request, trace, PipelineStage::OpenGate, e.into(), Some(session))
                .await);
        }
        trace.advance(PipelineState::GateTriggered);

        let broadcast = match BroadcastMessage::session(VEHICLE_ENTRY, &session) {
            Ok(message) => self.ctx.hub.publish(&message).await,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to encode entry broadcast");
                PublishReport::default()
            }
        };
        trace.advance(PipelineState::Broadcasted);

        self.ctx.emit(CoreEvent::EntryRecorded {
            session: session.clone(),
        });
        self.ctx
            .audit(AuditEventType::EntryRecorded {
                session_id: session.id,
                identifier: session.identifier.clone(),
                ticket_number: session.ticket_number.clone(),
                caller: request.caller.to_string(),
            })
            .await;

        info!(
            session_id = %session.id,
            identifier = %session.identifier,
            ticket = %session.ticket_number,
            vehicle_type = %session.vehicle_type_id,
            caller = %request.caller,
            subscribers = broadcast.delivered,
            "Entry recorded"
        );

        Ok(EntryReceipt {
            session,
            broadcast,
            trace: trace.finish(PipelineState::Completed),
        })
    }

    async fn abort(
        &self,
        request: &EntryRequest,
        trace: StateTrace,
        stage: PipelineStage,
        kind: PipelineErrorKind,
        persisted: Option<VehicleSession>,
    ) -> PipelineError {
        let err = PipelineError {
            lane: Lane::Entry,
            token: request.raw_token.clone(),
            stage,
            kind,
            caller: request.caller.clone(),
            persisted,
            trace: trace.finish(PipelineState::Aborted),
        };

        warn!(
            token = %err.token,
            stage = %stage,
            caller = %err.caller,
            error = %err.kind,
            "Entry aborted"
        );

        self.ctx.emit(CoreEvent::PipelineAborted {
            lane: Lane::Entry,
            token: err.token.clone(),
            stage: stage.to_string(),
            reason: err.kind.to_string(),
        });
        self.ctx
            .audit(AuditEventType::PipelineAborted {
                lane: Lane::Entry,
                token: err.token.clone(),
                stage: stage.to_string(),
                reason: err.kind.to_string(),
                caller: err.caller.to_string(),
            })
            .await;

        err
    }
}
