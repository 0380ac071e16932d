//! Entry and exit pipelines against an in-memory store and mock hardware

use chrono::{Duration as ChronoDuration, SubsecRound};
use parkgate_api::{Amount, CallerIdentity, ImageRef, Lane, RatePolicy, SessionStatus, VehicleSession};
use parkgate_config::{PipelineConfig, RateTable, TokenRules};
use parkgate_core::{
    CoreEvent, EntryRecorder, EntryRequest, ExitOrchestrator, ExitRequest, PipelineContext,
    PipelineErrorKind, PipelineStage, PipelineState, ScanDispatcher, SessionMatcher, partition_for,
};
use parkgate_host_api::{HardwareAdapter, MockHardware, ScanEvent};
use parkgate_hub::{BroadcastHub, ChannelSubscriber};
use parkgate_store::{
    AuditEvent, AuditEventType, CloseRequest, NewEntry, SessionStore, SqliteStore, StoreResult,
};
use parkgate_util::{IdentifierToken, PaymentMethodId, SessionId, TicketNumber, VehicleTypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

struct Harness {
    ctx: PipelineContext,
    store: Arc<SqliteStore>,
    hardware: Arc<MockHardware>,
    frames: mpsc::Receiver<String>,
    events: broadcast::Receiver<CoreEvent>,
}

fn policy() -> RatePolicy {
    RatePolicy {
        vehicle_type_id: VehicleTypeId(1),
        first_hour_rate: Amount(5000),
        next_hour_rate: Amount(3000),
        max_daily_rate: Amount(40000),
    }
}

async fn harness() -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let hardware = Arc::new(MockHardware::new());
    let hub = Arc::new(BroadcastHub::new(Duration::from_millis(200)));
    let (subscriber, frames) = ChannelSubscriber::new("test-display", 16);
    hub.subscribe(Arc::new(subscriber)).await;

    let (events_tx, events) = broadcast::channel(16);
    let ctx = PipelineContext {
        store: store.clone(),
        hardware: hardware.clone(),
        hub,
        matcher: SessionMatcher::new(TokenRules::default()),
        rates: Arc::new(RateTable::single(policy())),
        settings: PipelineConfig::default(),
        events: events_tx,
    };

    Harness {
        ctx,
        store,
        hardware,
        frames,
        events,
    }
}

fn park(store: &SqliteStore, token: &str, ago: ChronoDuration) {
    let entry_time = (parkgate_util::now() - ago).trunc_subsecs(3);
    store
        .insert_entry(&NewEntry {
            identifier: IdentifierToken::new(token),
            vehicle_type_id: VehicleTypeId(1),
            entry_time,
            entry_image_ref: ImageRef::new("images/in.jpg"),
            ticket_number: TicketNumber::generate(&entry_time),
            deadline: None,
        })
        .unwrap();
}

/// Delays the first write for one identifier, then behaves like the inner store
struct SlowStore {
    inner: Arc<SqliteStore>,
    token: &'static str,
    delay: Duration,
    stalled: AtomicBool,
}

impl SlowStore {
    fn new(inner: Arc<SqliteStore>, token: &'static str, delay: Duration) -> Self {
        Self {
            inner,
            token,
            delay,
            stalled: AtomicBool::new(false),
        }
    }

    fn maybe_stall(&self, identifier: &IdentifierToken) {
        if identifier.as_str() == self.token && !self.stalled.swap(true, Ordering::SeqCst) {
            std::thread::sleep(self.delay);
        }
    }
}

impl SessionStore for SlowStore {
    fn insert_entry(&self, entry: &NewEntry) -> StoreResult<SessionId> {
        self.maybe_stall(&entry.identifier);
        self.inner.insert_entry(entry)
    }

    fn close_open_session(
        &self,
        request: &CloseRequest,
        fee: &dyn Fn(&VehicleSession) -> Amount,
    ) -> StoreResult<VehicleSession> {
        self.maybe_stall(&request.identifier);
        self.inner.close_open_session(request, fee)
    }

    fn get_active_sessions(&self) -> StoreResult<Vec<VehicleSession>> {
        self.inner.get_active_sessions()
    }

    fn get_session(&self, id: SessionId) -> StoreResult<Option<VehicleSession>> {
        self.inner.get_session(id)
    }

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        self.inner.append_audit(event)
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.inner.get_recent_audits(limit)
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}

fn exit_request(token: &str) -> ExitRequest {
    ExitRequest {
        raw_token: token.into(),
        payment_method_id: Some(PaymentMethodId(2)),
        caller: CallerIdentity::new("lane-2"),
    }
}

fn entry_request(token: &str) -> EntryRequest {
    EntryRequest {
        raw_token: token.into(),
        vehicle_type_id: None,
        caller: CallerIdentity::new("lane-1"),
    }
}

#[tokio::test]
async fn exit_completes_with_fee_gate_and_broadcast() {
    let mut h = harness().await;
    park(&h.store, "ABC123", ChronoDuration::minutes(150));

    let orchestrator = ExitOrchestrator::new(h.ctx.clone());
    let receipt = orchestrator.process_exit(exit_request("  abc123\n")).await.unwrap();

    assert_eq!(receipt.session.identifier.as_str(), "ABC123");
    assert_eq!(receipt.session.status, SessionStatus::Closed);
    assert_eq!(receipt.session.fee, Some(Amount(8000)));
    assert_eq!(receipt.session.payment_method_id, Some(PaymentMethodId(2)));
    assert_eq!(receipt.broadcast.delivered, 1);
    assert_eq!(
        receipt.trace,
        vec![
            PipelineState::Idle,
            PipelineState::Validated,
            PipelineState::Matched,
            PipelineState::FeeComputed,
            PipelineState::Persisted,
            PipelineState::GateTriggered,
            PipelineState::Broadcasted,
            PipelineState::Completed,
        ]
    );

    assert_eq!(h.hardware.gate_openings(), vec![Lane::Exit]);
    assert!(h.store.get_active_sessions().unwrap().is_empty());

    let frame = h.frames.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "vehicle_exit");
    assert_eq!(value["data"]["fee"], 8000);
    assert_eq!(value["data"]["status"], "closed");

    match h.events.recv().await.unwrap() {
        CoreEvent::ExitCompleted { session } => assert_eq!(session, receipt.session),
        other => panic!("unexpected event {:?}", other),
    }

    let audits = h.store.get_recent_audits(10).unwrap();
    assert!(audits.iter().any(|a| matches!(
        a.event,
        AuditEventType::ExitCompleted { fee: Amount(8000), .. }
    )));
}

#[tokio::test]
async fn exit_without_open_session_is_not_found() {
    let mut h = harness().await;
    park(&h.store, "OTHER1", ChronoDuration::hours(1));
    let before = h.store.get_active_sessions().unwrap();

    let err = ExitOrchestrator::new(h.ctx.clone())
        .process_exit(exit_request("XYZ999"))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::MatchAndClose);
    assert!(matches!(err.kind, PipelineErrorKind::NotFound));
    assert!(err.persisted.is_none());
    let message = err.to_string();
    assert!(message.contains("XYZ999"));
    assert!(message.contains("match and close"));
    assert!(message.contains("no matching entry"));

    assert_eq!(h.store.get_active_sessions().unwrap(), before);
    assert!(h.hardware.gate_openings().is_empty());
    assert!(h.frames.try_recv().is_err());
    assert!(matches!(
        h.events.recv().await.unwrap(),
        CoreEvent::PipelineAborted { lane: Lane::Exit, .. }
    ));
}

#[tokio::test]
async fn malformed_token_aborts_before_hardware() {
    let h = harness().await;

    let err = ExitOrchestrator::new(h.ctx.clone())
        .process_exit(exit_request("AB#12"))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Validate);
    assert!(matches!(err.kind, PipelineErrorKind::Format(_)));
    assert_eq!(err.trace, vec![PipelineState::Idle, PipelineState::Aborted]);
    assert!(h.hardware.gate_openings().is_empty());
}

#[tokio::test]
async fn capture_failure_leaves_session_open() {
    let h = harness().await;
    park(&h.store, "ABC123", ChronoDuration::hours(3));
    h.hardware.set_fail_capture(true);

    let err = ExitOrchestrator::new(h.ctx.clone())
        .process_exit(exit_request("ABC123"))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::CaptureImage);
    assert!(matches!(err.kind, PipelineErrorKind::Hardware(_)));
    assert_eq!(h.store.get_active_sessions().unwrap().len(), 1);
}

#[tokio::test]
async fn gate_failure_keeps_closed_session_and_audits() {
    let mut h = harness().await;
    park(&h.store, "ABC123", ChronoDuration::hours(3));
    h.hardware.set_fail_gate(true);

    let err = ExitOrchestrator::new(h.ctx.clone())
        .process_exit(exit_request("ABC123"))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::OpenGate);
    let persisted = err.persisted.expect("closed session carried by the error");
    assert_eq!(persisted.status, SessionStatus::Closed);
    assert_eq!(persisted.fee, Some(Amount(11000)));
    assert_eq!(
        err.trace,
        vec![
            PipelineState::Idle,
            PipelineState::Validated,
            PipelineState::Matched,
            PipelineState::FeeComputed,
            PipelineState::Persisted,
            PipelineState::Aborted,
        ]
    );

    // Persisted state is not rolled back
    assert!(h.store.get_active_sessions().unwrap().is_empty());
    let stored = h.store.get_session(persisted.id).unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Closed);

    let audits = h.store.get_recent_audits(10).unwrap();
    assert!(audits.iter().any(|a| matches!(
        a.event,
        AuditEventType::GateFailed { lane: Lane::Exit, .. }
    )));
    assert!(h.frames.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_exits_close_once() {
    let h = harness().await;
    park(&h.store, "RACE01", ChronoDuration::hours(2));

    let a = ExitOrchestrator::new(h.ctx.clone());
    let b = ExitOrchestrator::new(h.ctx.clone());
    let (ra, rb) = tokio::join!(
        a.process_exit(exit_request("RACE01")),
        b.process_exit(exit_request("race01"))
    );

    let results = [ra, rb];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser.kind, PipelineErrorKind::NotFound));
    assert_eq!(h.hardware.gate_openings(), vec![Lane::Exit]);
}

#[tokio::test]
async fn entry_then_exit_round_trip() {
    let mut h = harness().await;
    let recorder = EntryRecorder::new(h.ctx.clone());
    let orchestrator = ExitOrchestrator::new(h.ctx.clone());

    let entry = recorder.record_entry(entry_request("51f-12345")).await.unwrap();
    assert_eq!(entry.session.identifier.as_str(), "51F-12345");
    assert_eq!(entry.session.status, SessionStatus::Active);
    assert_eq!(entry.session.vehicle_type_id, VehicleTypeId(1));
    assert!(entry.session.entry_image_ref.as_str().starts_with("mock://entry/"));
    assert_eq!(
        entry.trace,
        vec![
            PipelineState::Idle,
            PipelineState::Validated,
            PipelineState::Persisted,
            PipelineState::GateTriggered,
            PipelineState::Broadcasted,
            PipelineState::Completed,
        ]
    );

    let frame = h.frames.recv().await.unwrap();
    assert!(frame.contains("\"type\":\"vehicle_entry\""));
    assert!(matches!(
        h.events.recv().await.unwrap(),
        CoreEvent::EntryRecorded { .. }
    ));

    tokio::time::sleep(Duration::from_millis(5)).await;

    // Under an hour is free
    let exit = orchestrator.process_exit(exit_request("51F-12345")).await.unwrap();
    assert_eq!(exit.session.id, entry.session.id);
    assert_eq!(exit.session.fee, Some(Amount(0)));
    assert_eq!(h.hardware.gate_openings(), vec![Lane::Entry, Lane::Exit]);
}

#[tokio::test]
async fn second_entry_for_parked_vehicle_rejected() {
    let h = harness().await;
    let recorder = EntryRecorder::new(h.ctx.clone());

    recorder.record_entry(entry_request("ABC123")).await.unwrap();
    let err = recorder.record_entry(entry_request("abc123")).await.unwrap_err();

    assert_eq!(err.stage, PipelineStage::RecordEntry);
    assert!(matches!(err.kind, PipelineErrorKind::Persistence(_)));
    assert_eq!(h.store.get_active_sessions().unwrap().len(), 1);
    assert_eq!(h.hardware.gate_openings(), vec![Lane::Entry]);
}

#[tokio::test]
async fn dispatcher_routes_scans_by_lane() {
    let mut h = harness().await;
    park(&h.store, "OLD001", ChronoDuration::hours(1));

    let dispatcher = ScanDispatcher::new(
        EntryRecorder::new(h.ctx.clone()),
        ExitOrchestrator::new(h.ctx.clone()),
        4,
    );
    let scans = h.hardware.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(dispatcher.run(scans, shutdown_rx));

    h.hardware.simulate_scan(ScanEvent::entry("NEW001", CallerIdentity::new("lane-1")));
    h.hardware.simulate_scan(ScanEvent::exit("OLD001", CallerIdentity::new("lane-2")));

    let mut entries = 0;
    let mut exits = 0;
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(2), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            CoreEvent::EntryRecorded { session } => {
                assert_eq!(session.identifier.as_str(), "NEW001");
                entries += 1;
            }
            CoreEvent::ExitCompleted { session } => {
                assert_eq!(session.identifier.as_str(), "OLD001");
                assert_eq!(session.fee, Some(Amount(5000)));
                exits += 1;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!((entries, exits), (1, 1));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    let active = h.store.get_active_sessions().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].identifier.as_str(), "NEW001");
}

#[tokio::test]
async fn slow_close_past_store_timeout_leaves_session_open() {
    let mut h = harness().await;
    park(&h.store, "SLOW01", ChronoDuration::hours(2));

    let ctx = PipelineContext {
        store: Arc::new(SlowStore::new(
            h.store.clone(),
            "SLOW01",
            Duration::from_millis(300),
        )),
        settings: PipelineConfig {
            store_timeout: Duration::from_millis(100),
            ..PipelineConfig::default()
        },
        ..h.ctx.clone()
    };

    let err = ExitOrchestrator::new(ctx)
        .process_exit(exit_request("SLOW01"))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::MatchAndClose);
    assert!(matches!(err.kind, PipelineErrorKind::Persistence(_)));
    assert!(err.to_string().contains("timed out"));
    assert!(err.persisted.is_none());

    // The reported abort matches what is stored
    let active = h.store.get_active_sessions().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].identifier.as_str(), "SLOW01");
    assert_eq!(active[0].status, SessionStatus::Active);
    assert!(h.hardware.gate_openings().is_empty());
    assert!(h.frames.try_recv().is_err());

    // The vehicle can still leave once the store is responsive
    let receipt = ExitOrchestrator::new(h.ctx.clone())
        .process_exit(exit_request("SLOW01"))
        .await
        .unwrap();
    assert_eq!(receipt.session.fee, Some(Amount(8000)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_partition_does_not_block_others() {
    let mut h = harness().await;
    let fast = ["FAST01", "FAST02", "FAST03", "FAST04", "FAST05", "FAST06", "FAST07"]
        .into_iter()
        .find(|t| partition_for(t, 2) != partition_for("STUCK1", 2))
        .expect("a token on the other partition");

    let ctx = PipelineContext {
        store: Arc::new(SlowStore::new(
            h.store.clone(),
            "STUCK1",
            Duration::from_millis(1500),
        )),
        ..h.ctx.clone()
    };
    let dispatcher = ScanDispatcher::new(
        EntryRecorder::new(ctx.clone()),
        ExitOrchestrator::new(ctx),
        2,
    );
    let scans = h.hardware.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(dispatcher.run(scans, shutdown_rx));

    // A long backlog queued behind one slow write
    for _ in 0..70 {
        h.hardware
            .simulate_scan(ScanEvent::entry("STUCK1", CallerIdentity::new("lane-1")));
    }
    h.hardware
        .simulate_scan(ScanEvent::entry(fast, CallerIdentity::new("lane-1")));

    let event = tokio::time::timeout(Duration::from_millis(800), h.events.recv())
        .await
        .expect("other partition was held up")
        .unwrap();
    match event {
        CoreEvent::EntryRecorded { session } => assert_eq!(session.identifier.as_str(), fast),
        other => panic!("unexpected event {:?}", other),
    }

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    // The stalled entry eventually lands; its repeats are rejected
    let active = h.store.get_active_sessions().unwrap();
    assert_eq!(active.len(), 2);
}
