//! Subscriber registry and fan-out

use futures::future::join_all;
use parkgate_api::{BroadcastMessage, ack_frame};
use parkgate_util::SubscriberId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::SubscriberConnection;

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Registry of live subscribers
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn SubscriberConnection>>>,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Register a connection
    pub async fn subscribe(&self, connection: Arc<dyn SubscriberConnection>) -> SubscriberId {
        let id = SubscriberId::new();
        let peer = connection.describe();

        let count = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(id, connection);
            subscribers.len()
        };

        info!(subscriber_id = %id, peer = %peer, subscribers = count, "Subscriber connected");
        id
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id);
        if removed.is_some() {
            info!(subscriber_id = %id, "Subscriber disconnected");
        }
        removed.is_some()
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().await.contains_key(&id)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Send `message` to every subscriber registered at call time.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Subscribers
    /// whose send fails or times out are removed.
    pub async fn publish(&self, message: &BroadcastMessage) -> PublishReport {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(message_type = %message.message_type(), error = %e, "Failed to encode broadcast");
                return PublishReport::default();
            }
        };

        let snapshot: Vec<(SubscriberId, Arc<dyn SubscriberConnection>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect();

        let attempts = snapshot.iter().map(|(id, conn)| {
            let frame = frame.as_str();
            async move {
                match tokio::time::timeout(self.send_timeout, conn.send_text(frame)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => {
                        debug!(subscriber_id = %id, error = %e, "Broadcast send failed");
                        Some(*id)
                    }
                    Err(_) => {
                        debug!(subscriber_id = %id, "Broadcast send timed out");
                        Some(*id)
                    }
                }
            }
        });

        let failed: Vec<SubscriberId> = join_all(attempts).await.into_iter().flatten().collect();
        let pruned = self.prune(&failed).await;

        let report = PublishReport {
            delivered: snapshot.len() - failed.len(),
            pruned,
        };
        debug!(
            message_type = %message.message_type(),
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast published"
        );
        report
    }

    /// Acknowledge an inbound frame to its sender only.
    ///
    /// Returns false (and prunes the subscriber) if the reply could not be sent.
    pub async fn reply(&self, id: SubscriberId, received: &str) -> bool {
        let Some(conn) = self.subscribers.read().await.get(&id).cloned() else {
            return false;
        };

        let frame = ack_frame(received);
        match tokio::time::timeout(self.send_timeout, conn.send_text(&frame)).await {
            Ok(Ok(())) => true,
            _ => {
                debug!(subscriber_id = %id, "Reply failed");
                self.prune(&[id]).await;
                false
            }
        }
    }

    /// Close every connection and empty the registry
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.subscribers.write().await.drain().collect();
        let count = drained.len();

        join_all(drained.into_iter().map(|(_, conn)| async move {
            let _ = tokio::time::timeout(self.send_timeout, conn.close()).await;
        }))
        .await;

        info!(closed = count, "All subscribers closed");
    }

    async fn prune(&self, ids: &[SubscriberId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let removed: Vec<_> = {
            let mut subscribers = self.subscribers.write().await;
            ids.iter()
                .filter_map(|id| subscribers.remove(id).map(|conn| (*id, conn)))
                .collect()
        };

        for (id, conn) in &removed {
            warn!(subscriber_id = %id, peer = %conn.describe(), "Pruned unresponsive subscriber");
        }

        // Close concurrently; each close is bounded by the send timeout
        join_all(removed.iter().map(|(_, conn)| async move {
            let _ = tokio::time::timeout(self.send_timeout, conn.close()).await;
        }))
        .await;

        removed.len()
    }
}
