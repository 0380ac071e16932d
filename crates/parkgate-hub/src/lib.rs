//! Broadcast hub for parkgated
//!
//! Provides:
//! - A concurrency-safe subscriber registry with timed, pruning fan-out
//! - A WebSocket server that registers each accepted connection
//! - Acknowledgement replies for inbound subscriber frames

mod connection;
mod hub;
mod server;

pub use connection::*;
pub use hub::*;
pub use server::*;

use std::net::SocketAddr;
use thiserror::Error;

/// Hub errors
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake with {peer} failed: {reason}")]
    Handshake { peer: SocketAddr, reason: String },
}

pub type HubResult<T> = Result<T, HubError>;
