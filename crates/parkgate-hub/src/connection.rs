//! Subscriber connection handles

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A failed delivery to one subscriber. Never leaves the hub.
#[derive(Debug, Clone, Error)]
#[error("send failed: {0}")]
pub struct SendError(pub String);

/// Outbound side of one subscriber
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    /// Deliver one text frame
    async fn send_text(&self, frame: &str) -> Result<(), SendError>;

    /// Close the connection. Errors are ignored.
    async fn close(&self);

    /// Peer description for logs
    fn describe(&self) -> String {
        "subscriber".into()
    }
}

/// In-process subscriber that forwards frames into a channel
pub struct ChannelSubscriber {
    tx: mpsc::Sender<String>,
    label: String,
}

impl ChannelSubscriber {
    pub fn new(label: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                label: label.into(),
            },
            rx,
        )
    }
}

#[async_trait]
impl SubscriberConnection for ChannelSubscriber {
    async fn send_text(&self, frame: &str) -> Result<(), SendError> {
        self.tx
            .send(frame.to_string())
            .await
            .map_err(|_| SendError("receiver dropped".into()))
    }

    async fn close(&self) {}

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_subscriber_forwards() {
        let (sub, mut rx) = ChannelSubscriber::new("display-1", 4);
        sub.send_text("frame").await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("frame"));
        assert_eq!(sub.describe(), "display-1");
    }

    #[tokio::test]
    async fn channel_subscriber_fails_when_dropped() {
        let (sub, rx) = ChannelSubscriber::new("display-2", 4);
        drop(rx);
        assert!(sub.send_text("frame").await.is_err());
    }
}
