//! Shared plumbing for the entry and exit pipelines

use parkgate_api::{CallerIdentity, Lane, VehicleSession};
use parkgate_config::{PipelineConfig, RateTable};
use parkgate_host_api::{HardwareAdapter, HardwareError};
use parkgate_hub::BroadcastHub;
use parkgate_store::{AuditEvent, AuditEventType, SessionStore, StoreError, StoreResult};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::{CoreEvent, FormatError, SessionMatcher};

/// Collaborators shared by both lanes
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn SessionStore>,
    pub hardware: Arc<dyn HardwareAdapter>,
    pub hub: Arc<BroadcastHub>,
    pub matcher: SessionMatcher,
    pub rates: Arc<RateTable>,
    pub settings: PipelineConfig,
    pub events: broadcast::Sender<CoreEvent>,
}

impl PipelineContext {
    /// Listen for in-process pipeline events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Run a store call on the blocking pool.
    ///
    /// `f` receives the deadline derived from the store timeout and must pass
    /// it on to writes, which roll back once it has passed. The result is
    /// always the store's actual outcome: if the deadline fires first we keep
    /// waiting until the store has committed or rolled back.
    pub(crate) async fn store_call<T, F>(&self, f: F) -> Result<T, PipelineErrorKind>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SessionStore, Instant) -> StoreResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        let timeout = self.settings.store_timeout;
        let deadline = Instant::now() + timeout;
        let mut task = tokio::task::spawn_blocking(move || f(store.as_ref(), deadline));

        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Store call overran its deadline, waiting for the outcome"
                );
                task.await
            }
        };

        match joined {
            Ok(Err(StoreError::DeadlineExceeded)) => Err(PipelineErrorKind::Persistence(format!(
                "store call timed out after {}ms",
                timeout.as_millis()
            ))),
            Ok(result) => result.map_err(PipelineErrorKind::from),
            Err(join_err) => Err(PipelineErrorKind::Persistence(format!(
                "store task failed: {}",
                join_err
            ))),
        }
    }

    /// Append an audit entry; failures are logged and otherwise ignored
    pub(crate) async fn audit(&self, event: AuditEventType) {
        let result = self
            .store_call(move |store, _| store.append_audit(AuditEvent::new(event)))
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    pub(crate) fn emit(&self, event: CoreEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Progress of one pipeline run.
///
/// Exits walk `Idle -> Validated -> Matched -> FeeComputed -> Persisted ->
/// GateTriggered -> Broadcasted -> Completed`. Entries skip `Matched` and
/// `FeeComputed`. `Aborted` is terminal and reachable from any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validated,
    Matched,
    FeeComputed,
    Persisted,
    GateTriggered,
    Broadcasted,
    Completed,
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Aborted)
    }
}

/// The step that was running when a pipeline aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validate,
    CaptureImage,
    MatchAndClose,
    RecordEntry,
    OpenGate,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Validate => "validation",
            PipelineStage::CaptureImage => "image capture",
            PipelineStage::MatchAndClose => "match and close",
            PipelineStage::RecordEntry => "entry record",
            PipelineStage::OpenGate => "gate trigger",
        })
    }
}

/// Error taxonomy shared by both lanes
#[derive(Debug, Error)]
pub enum PipelineErrorKind {
    #[error("malformed identifier: {0}")]
    Format(#[from] FormatError),

    #[error("no matching entry")]
    NotFound,

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("hardware failure: {0}")]
    Hardware(#[from] HardwareError),

    #[error("invalid exit time: {0}")]
    Validation(String),
}

impl From<StoreError> for PipelineErrorKind {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => PipelineErrorKind::NotFound,
            StoreError::InvalidExitTime { .. } => PipelineErrorKind::Validation(e.to_string()),
            other => PipelineErrorKind::Persistence(other.to_string()),
        }
    }
}

/// An aborted pipeline run, naming the token and the failing stage
#[derive(Debug, Error)]
#[error("{lane} for '{token}' aborted at {stage}: {kind}")]
pub struct PipelineError {
    pub lane: Lane,

    /// Token as scanned, before normalization
    pub token: String,

    pub stage: PipelineStage,
    pub kind: PipelineErrorKind,
    pub caller: CallerIdentity,

    /// Session already written before the failure (gate trigger only)
    pub persisted: Option<VehicleSession>,

    /// States visited, ending in `Aborted`
    pub trace: Vec<PipelineState>,
}

/// Records the states a run passes through
#[derive(Debug)]
pub(crate) struct StateTrace {
    states: Vec<PipelineState>,
    lane: Lane,
}

impl StateTrace {
    pub(crate) fn new(lane: Lane) -> Self {
        Self {
            states: vec![PipelineState::Idle],
            lane,
        }
    }

    pub(crate) fn advance(&mut self, next: PipelineState) {
        tracing::trace!(lane = %self.lane, state = ?next, "Pipeline state");
        self.states.push(next);
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }

    pub(crate) fn finish(mut self, last: PipelineState) -> Vec<PipelineState> {
        self.advance(last);
        self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkgate_util::IdentifierToken;

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(
            PipelineErrorKind::from(StoreError::NotFound(IdentifierToken::new("X"))),
            PipelineErrorKind::NotFound
        ));
        assert!(matches!(
            PipelineErrorKind::from(StoreError::Constraint("UNIQUE".into())),
            PipelineErrorKind::Persistence(_)
        ));
        assert!(matches!(
            PipelineErrorKind::from(StoreError::Database("disk I/O error".into())),
            PipelineErrorKind::Persistence(_)
        ));
    }

    #[test]
    fn error_names_token_and_stage() {
        let err = PipelineError {
            lane: Lane::Exit,
            token: "51F-12345".into(),
            stage: PipelineStage::MatchAndClose,
            kind: PipelineErrorKind::NotFound,
            caller: CallerIdentity::system(),
            persisted: None,
            trace: vec![PipelineState::Idle, PipelineState::Validated, PipelineState::Aborted],
        };
        assert_eq!(
            err.to_string(),
            "exit for '51F-12345' aborted at match and close: no matching entry"
        );
    }

    #[test]
    fn trace_records_states() {
        let mut trace = StateTrace::new(Lane::Entry);
        trace.advance(PipelineState::Validated);
        assert_eq!(trace.current(), PipelineState::Validated);
        let states = trace.finish(PipelineState::Aborted);
        assert_eq!(
            states,
            vec![PipelineState::Idle, PipelineState::Validated, PipelineState::Aborted]
        );
        assert!(states.last().unwrap().is_terminal());
    }
}
