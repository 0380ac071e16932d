//! Mock hardware adapter for testing

use async_trait::async_trait;
use parkgate_api::{ImageRef, Lane};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::{HardwareAdapter, HardwareError, HardwareResult, ScanEvent};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock hardware adapter for unit/integration testing
pub struct MockHardware {
    next_image: AtomicU64,
    event_tx: mpsc::UnboundedSender<ScanEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ScanEvent>>>>,
    gate_log: Arc<Mutex<Vec<Lane>>>,

    /// Configure image capture to fail
    pub fail_capture: Arc<Mutex<bool>>,

    /// Configure gate barrier to fail
    pub fail_gate: Arc<Mutex<bool>>,
}

impl MockHardware {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            next_image: AtomicU64::new(1),
            event_tx: tx,
            event_rx: Arc::new(Mutex::new(Some(rx))),
            gate_log: Arc::new(Mutex::new(Vec::new())),
            fail_capture: Arc::new(Mutex::new(false)),
            fail_gate: Arc::new(Mutex::new(false)),
        }
    }

    /// Simulate a scanner read
    pub fn simulate_scan(&self, event: ScanEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Lanes whose barrier was opened, in order
    pub fn gate_openings(&self) -> Vec<Lane> {
        lock(&self.gate_log).clone()
    }

    pub fn set_fail_capture(&self, fail: bool) {
        *lock(&self.fail_capture) = fail;
    }

    pub fn set_fail_gate(&self, fail: bool) {
        *lock(&self.fail_gate) = fail;
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareAdapter for MockHardware {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ScanEvent> {
        match lock(&self.event_rx).take() {
            Some(rx) => rx,
            None => {
                tracing::warn!("Mock scan stream already taken, returning a closed stream");
                let (_tx, rx) = mpsc::unbounded_channel();
                rx
            }
        }
    }

    async fn capture_image(&self, lane: Lane) -> HardwareResult<ImageRef> {
        if *lock(&self.fail_capture) {
            return Err(HardwareError::CaptureFailed {
                lane,
                reason: "Mock capture failure".into(),
            });
        }

        let n = self.next_image.fetch_add(1, Ordering::SeqCst);
        Ok(ImageRef::new(format!("mock://{}/{}.jpg", lane, n)))
    }

    async fn open_gate_barrier(&self, lane: Lane) -> HardwareResult<()> {
        if *lock(&self.fail_gate) {
            return Err(HardwareError::GateFailed {
                lane,
                reason: "Mock gate failure".into(),
            });
        }

        lock(&self.gate_log).push(lane);
        Ok(())
    }
}
