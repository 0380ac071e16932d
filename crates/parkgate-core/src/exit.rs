//! Exit orchestrator

use parkgate_api::{BroadcastMessage, CallerIdentity, Lane, VEHICLE_EXIT, VehicleSession};
use parkgate_hub::PublishReport;
use parkgate_store::{AuditEventType, CloseRequest};
use parkgate_util::PaymentMethodId;
use tracing::{error, info, warn};

use crate::{
    CoreEvent, PipelineContext, PipelineError, PipelineErrorKind, PipelineStage, PipelineState,
    StateTrace, compute_fee,
};

/// One exit attempt as reported by the lane
#[derive(Debug, Clone)]
pub struct ExitRequest {
    pub raw_token: String,
    pub payment_method_id: Option<PaymentMethodId>,
    pub caller: CallerIdentity,
}

/// A completed exit
#[derive(Debug, Clone)]
pub struct ExitReceipt {
    pub session: VehicleSession,
    pub broadcast: PublishReport,
    pub trace: Vec<PipelineState>,
}

/// Drives one exit attempt through validation, atomic close, gate and
/// broadcast. Holds no locks across sessions; two racing exits for the same
/// identifier are settled by the store.
#[derive(Clone)]
pub struct ExitOrchestrator {
    ctx: PipelineContext,
}

impl ExitOrchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn process_exit(&self, request: ExitRequest) -> Result<ExitReceipt, PipelineError> {
        let mut trace = StateTrace::new(Lane::Exit);

        let identifier = match self.ctx.matcher.validate(&request.raw_token) {
            Ok(identifier) => identifier,
            Err(e) => {
                return Err(self
                    .abort(&request, trace, PipelineStage::Validate, e.into(), None)
                    .await);
            }
        };
        trace.advance(PipelineState::Validated);

        let exit_image_ref = match self.ctx.hardware.capture_image(Lane::Exit).await {
            Ok(image) => image,
            Err(e) => {
                return Err(self
                    .abort(&request, trace, PipelineStage::CaptureImage, e.into(), None)
                    .await);
            }
        };

        let mut close = CloseRequest {
            identifier: identifier.clone(),
            exit_time: parkgate_util::now(),
            exit_image_ref,
            payment_method_id: request
                .payment_method_id
                .unwrap_or(self.ctx.settings.default_payment_method),
            deadline: None,
        };
        let rates = self.ctx.rates.clone();
        let closed = self
            .ctx
            .store_call(move |store, deadline| {
                close.deadline = Some(deadline);
                store.close_open_session(&close, &|open: &VehicleSession| {
                    let exit_time = open.exit_time.unwrap_or(close.exit_time);
                    compute_fee(open.entry_time, exit_time, rates.policy_for(open.vehicle_type_id))
                })
            })
            .await;

        let session = match closed {
            Ok(session) => session,
            Err(kind) => {
                return Err(self
                    .abort(&request, trace, PipelineStage::MatchAndClose, kind, None)
                    .await);
            }
        };
        trace.advance(PipelineState::Matched);
        trace.advance(PipelineState::FeeComputed);
        trace.advance(PipelineState::Persisted);

        if let Err(e) = self.ctx.hardware.open_gate_barrier(Lane::Exit).await {
            error!(
                session_id = %session.id,
                identifier = %session.identifier,
                error = %e,
                "Exit gate failed after session was closed"
            );
            self.ctx
                .audit(AuditEventType::GateFailed {
                    lane: Lane::Exit,
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

        let broadcast = match BroadcastMessage::session(VEHICLE_EXIT, &session) {
            Ok(message) => self.ctx.hub.publish(&message).await,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to encode exit broadcast");
                PublishReport::default()
            }
        };
        trace.advance(PipelineState::Broadcasted);

        self.ctx.emit(CoreEvent::ExitCompleted {
            session: session.clone(),
        });
        self.ctx
            .audit(AuditEventType::ExitCompleted {
                session_id: session.id,
                identifier: session.identifier.clone(),
                fee: session.fee.unwrap_or_default(),
                caller: request.caller.to_string(),
            })
            .await;

        info!(
            session_id = %session.id,
            identifier = %session.identifier,
            fee = %session.fee.unwrap_or_default(),
            parked = ?session.parked_for().map(parkgate_util::format_duration),
            caller = %request.caller,
            subscribers = broadcast.delivered,
            "Exit completed"
        );

        Ok(ExitReceipt {
            session,
            broadcast,
            trace: trace.finish(PipelineState::Completed),
        })
    }

    async fn abort(
        &self,
        request: &ExitRequest,
        trace: StateTrace,
        stage: PipelineStage,
        kind: PipelineErrorKind,
        persisted: Option<VehicleSession>,
    ) -> PipelineError {
        let reached = trace.current();
        let err = PipelineError {
            lane: Lane::Exit,
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
            reached = ?reached,
            caller = %err.caller,
            error = %err.kind,
            "Exit aborted"
        );

        self.ctx.emit(CoreEvent::PipelineAborted {
            lane: Lane::Exit,
            token: err.token.clone(),
            stage: stage.to_string(),
            reason: err.kind.to_string(),
        });
        self.ctx
            .audit(AuditEventType::PipelineAborted {
                lane: Lane::Exit,
                token: err.token.clone(),
                stage: stage.to_string(),
                reason: err.kind.to_string(),
                caller: err.caller.to_string(),
            })
            .await;

        err
    }
}
