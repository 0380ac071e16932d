//! HTTP snapshot camera

use parkgate_api::{ImageRef, Lane};
use parkgate_host_api::{HardwareError, HardwareResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error};

use crate::relay::{build_client, get, split_url_credentials};

/// Fetches a still image per capture and stores it under `<images_dir>/<lane>/`
pub struct SnapshotCamera {
    lane: Lane,
    url: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
    dir: PathBuf,
    seq: AtomicU64,
}

impl SnapshotCamera {
    pub fn new(lane: Lane, url: &str, timeout: Duration, images_dir: &Path) -> HardwareResult<Self> {
        let (url, credentials) = split_url_credentials(url);
        Ok(Self {
            lane,
            url,
            credentials,
            client: build_client(timeout)?,
            dir: images_dir.join(lane.as_str()),
            seq: AtomicU64::new(0),
        })
    }

    pub async fn capture(&self) -> HardwareResult<ImageRef> {
        let response = get(&self.client, &self.url, &self.credentials)
            .send()
            .await
            .map_err(|e| self.failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failed(format!("camera answered HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.failed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(self.failed("camera returned an empty image".into()));
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{:04}.jpg",
            parkgate_util::now().format("%Y%m%d-%H%M%S%.3f"),
            seq % 10_000
        );
        let path = self.dir.join(name);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, &bytes).await?;

        debug!(lane = %self.lane, path = %path.display(), size = bytes.len(), "Snapshot stored");
        Ok(ImageRef::new(path.display().to_string()))
    }

    fn failed(&self, reason: String) -> HardwareError {
        error!(lane = %self.lane, url = %self.url, reason = %reason, "Snapshot failed");
        HardwareError::CaptureFailed {
            lane: self.lane,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::test_server;
    use tempfile::tempdir;

    #[tokio::test]
    async fn capture_writes_image_under_lane_dir() {
        let dir = tempdir().unwrap();
        let (url, _head) = test_server::one_shot("200 OK", b"\xff\xd8\xff\xe0jpeg").await;
        let camera = SnapshotCamera::new(Lane::Entry, &url, Duration::from_secs(2), dir.path()).unwrap();

        let image = camera.capture().await.unwrap();

        let path = PathBuf::from(image.as_str());
        assert!(path.starts_with(dir.path().join("entry")));
        assert_eq!(std::fs::read(&path).unwrap(), b"\xff\xd8\xff\xe0jpeg");
    }

    #[tokio::test]
    async fn camera_error_is_capture_failure() {
        let dir = tempdir().unwrap();
        let (url, _head) = test_server::one_shot("503 Service Unavailable", b"").await;
        let camera = SnapshotCamera::new(Lane::Exit, &url, Duration::from_secs(2), dir.path()).unwrap();

        let err = camera.capture().await.unwrap_err();
        assert!(matches!(err, HardwareError::CaptureFailed { lane: Lane::Exit, .. }));
        assert!(!dir.path().join("exit").exists());
    }
}
