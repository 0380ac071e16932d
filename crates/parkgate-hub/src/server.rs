//! WebSocket server feeding the broadcast hub

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use parkgate_config::HubConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tracing::{debug, error, info, warn};

use crate::{BroadcastHub, HubError, HubResult, SendError, SubscriberConnection};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Outbound half of an accepted WebSocket
struct WsSubscriber {
    sink: Mutex<WsSink>,
    peer: SocketAddr,
}

#[async_trait]
impl SubscriberConnection for WsSubscriber {
    async fn send_text(&self, frame: &str) -> Result<(), SendError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| SendError(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }

    fn describe(&self) -> String {
        self.peer.to_string()
    }
}

/// Accepts WebSocket subscribers and registers them with the hub
pub struct HubServer {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    config: Arc<HubConfig>,
}

impl HubServer {
    /// Bind the listener. A failure here is fatal for the service.
    pub async fn bind(config: &HubConfig, hub: Arc<BroadcastHub>) -> HubResult<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| HubError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!(addr = %addr, path = %config.path, "Broadcast hub listening");

        Ok(Self {
            listener,
            hub,
            config: Arc::new(config.clone()),
        })
    }

    pub fn local_addr(&self) -> HubResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to true, then close every
    /// subscriber.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> HubResult<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let hub = self.hub.clone();
                            let config = self.config.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, hub, config, shutdown).await {
                                    debug!(error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Broadcast hub stopping");
        self.hub.close_all().await;
        Ok(())
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
    config: Arc<HubConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> HubResult<()> {
    let check = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() != config.path {
            debug!(peer = %peer, path = %request.uri().path(), "Unknown path");
            return Err(reject(StatusCode::NOT_FOUND, "Not Found"));
        }

        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        if !config.origin_allowed(origin) {
            warn!(peer = %peer, origin = ?origin, "Origin refused");
            return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
        }

        Ok(response)
    };

    let handshake = tokio::time::timeout(
        config.handshake_timeout,
        tokio_tungstenite::accept_hdr_async(stream, check),
    );
    let ws = tokio::select! {
        result = handshake => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                return Err(HubError::Handshake {
                    peer,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(HubError::Handshake {
                    peer,
                    reason: format!(
                        "not completed within {}ms",
                        config.handshake_timeout.as_millis()
                    ),
                });
            }
        },
        _ = shutdown_requested(&mut shutdown) => {
            debug!(peer = %peer, "Shutdown during handshake");
            return Ok(());
        }
    };

    let (sink, mut incoming) = ws.split();
    let connection = Arc::new(WsSubscriber {
        sink: Mutex::new(sink),
        peer,
    });
    let id = hub.subscribe(connection.clone()).await;

    loop {
        tokio::select! {
            frame = incoming.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !hub.reply(id, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(subscriber_id = %id, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(subscriber_id = %id, error = %e, "Read error");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    hub.unsubscribe(id).await;
    let _ = tokio::time::timeout(config.send_timeout, connection.close()).await;
    Ok(())
}

/// Resolves once shutdown is signalled or its sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
