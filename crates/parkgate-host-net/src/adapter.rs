//! Hardware adapter over scanners, relays and cameras on the network

use async_trait::async_trait;
use parkgate_api::{ImageRef, Lane};
use parkgate_config::HardwareConfig;
use parkgate_host_api::{HardwareAdapter, HardwareResult, ScanEvent};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{GateRelay, SnapshotCamera};

struct LaneDevices {
    gate: Option<GateRelay>,
    camera: Option<SnapshotCamera>,
}

impl LaneDevices {
    fn new(
        lane: Lane,
        gate_url: Option<&str>,
        camera_url: Option<&str>,
        config: &HardwareConfig,
        images_dir: &Path,
    ) -> HardwareResult<Self> {
        let gate = gate_url
            .map(|url| GateRelay::new(lane, url, config.request_timeout))
            .transpose()?;
        let camera = camera_url
            .map(|url| SnapshotCamera::new(lane, url, config.request_timeout, images_dir))
            .transpose()?;

        info!(
            lane = %lane,
            gate = gate.as_ref().map(|g| g.url()).unwrap_or("none"),
            camera = camera.is_some(),
            "Lane devices configured"
        );

        Ok(Self { gate, camera })
    }
}

/// Networked lane hardware.
///
/// A lane without a camera records [`ImageRef::unavailable`]; a lane without
/// a gate relay is free-flow and its barrier step always succeeds.
pub struct NetHardware {
    scan_tx: mpsc::UnboundedSender<ScanEvent>,
    scan_rx: Mutex<Option<mpsc::UnboundedReceiver<ScanEvent>>>,
    entry: LaneDevices,
    exit: LaneDevices,
}

impl NetHardware {
    pub fn new(config: &HardwareConfig, images_dir: &Path) -> HardwareResult<Self> {
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();

        Ok(Self {
            scan_tx,
            scan_rx: Mutex::new(Some(scan_rx)),
            entry: LaneDevices::new(
                Lane::Entry,
                config.entry_gate_url.as_deref(),
                config.entry_camera_url.as_deref(),
                config,
                images_dir,
            )?,
            exit: LaneDevices::new(
                Lane::Exit,
                config.exit_gate_url.as_deref(),
                config.exit_camera_url.as_deref(),
                config,
                images_dir,
            )?,
        })
    }

    /// Sender feeding the stream returned by [`HardwareAdapter::subscribe`]
    pub fn scan_sender(&self) -> mpsc::UnboundedSender<ScanEvent> {
        self.scan_tx.clone()
    }

    fn lane(&self, lane: Lane) -> &LaneDevices {
        match lane {
            Lane::Entry => &self.entry,
            Lane::Exit => &self.exit,
        }
    }
}

#[async_trait]
impl HardwareAdapter for NetHardware {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ScanEvent> {
        let taken = self
            .scan_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match taken {
            Some(rx) => rx,
            None => {
                warn!("Scan stream already taken, returning a closed stream");
                let (_tx, rx) = mpsc::unbounded_channel();
                rx
            }
        }
    }

    async fn capture_image(&self, lane: Lane) -> HardwareResult<ImageRef> {
        match &self.lane(lane).camera {
            Some(camera) => camera.capture().await,
            None => {
                debug!(lane = %lane, "No camera on lane");
                Ok(ImageRef::unavailable())
            }
        }
    }

    async fn open_gate_barrier(&self, lane: Lane) -> HardwareResult<()> {
        match &self.lane(lane).gate {
            Some(gate) => gate.open().await,
            None => {
                debug!(lane = %lane, "No gate relay on lane, free-flow");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::test_server;
    use parkgate_api::CallerIdentity;
    use parkgate_host_api::HardwareError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn bare_lanes_fall_back() {
        let dir = tempdir().unwrap();
        let hardware = NetHardware::new(&HardwareConfig::default(), dir.path()).unwrap();

        assert_eq!(
            hardware.capture_image(Lane::Entry).await.unwrap(),
            ImageRef::unavailable()
        );
        hardware.open_gate_barrier(Lane::Exit).await.unwrap();
    }

    #[tokio::test]
    async fn scans_flow_through_subscription() {
        let dir = tempdir().unwrap();
        let hardware = NetHardware::new(&HardwareConfig::default(), dir.path()).unwrap();

        let mut rx = hardware.subscribe();
        hardware
            .scan_sender()
            .send(ScanEvent::exit("ABC123", CallerIdentity::new("scanner@test")))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().raw_token, "ABC123");

        // A second subscriber gets a closed stream
        assert!(hardware.subscribe().recv().await.is_none());
    }

    #[tokio::test]
    async fn routes_gate_by_lane() {
        let dir = tempdir().unwrap();
        let (exit_url, head) = test_server::one_shot("200 OK", b"").await;
        let (entry_url, _entry_head) = test_server::one_shot("500 Internal Server Error", b"").await;
        let config = HardwareConfig {
            entry_gate_url: Some(entry_url),
            exit_gate_url: Some(format!("{}/exit", exit_url)),
            ..HardwareConfig::default()
        };
        let hardware = NetHardware::new(&config, dir.path()).unwrap();

        hardware.open_gate_barrier(Lane::Exit).await.unwrap();
        assert!(head.await.unwrap().starts_with("GET /exit "));

        assert!(matches!(
            hardware.open_gate_barrier(Lane::Entry).await,
            Err(HardwareError::GateFailed { lane: Lane::Entry, .. })
        ));
    }
}
