//! Lane scanner listener
//!
//! Scanners connect over TCP and write one read per line:
//! `ENTRY <token> [vehicle_type]` or `EXIT <token> [payment_method]`.
//! The peer address becomes the caller identity.

use parkgate_api::{CallerIdentity, Lane};
use parkgate_host_api::{HardwareResult, ScanEvent};
use parkgate_util::{PaymentMethodId, VehicleTypeId};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// A scanner line that could not be turned into a scan event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanLineError {
    #[error("empty line")]
    Empty,

    #[error("unknown lane '{0}'")]
    UnknownLane(String),

    #[error("missing token")]
    MissingToken,

    #[error("invalid {field} '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unexpected trailing input '{0}'")]
    Trailing(String),
}

/// Parse one scanner line. The token is passed through untouched; format
/// checks belong to the pipelines.
pub fn parse_scan_line(line: &str, caller: CallerIdentity) -> Result<ScanEvent, ScanLineError> {
    let mut parts = line.split_whitespace();

    let keyword = parts.next().ok_or(ScanLineError::Empty)?;
    let lane = if keyword.eq_ignore_ascii_case("ENTRY") {
        Lane::Entry
    } else if keyword.eq_ignore_ascii_case("EXIT") {
        Lane::Exit
    } else {
        return Err(ScanLineError::UnknownLane(keyword.to_string()));
    };

    let token = parts.next().ok_or(ScanLineError::MissingToken)?;
    let extra = parts.next();
    if let Some(rest) = parts.next() {
        return Err(ScanLineError::Trailing(rest.to_string()));
    }

    let event = match lane {
        Lane::Entry => {
            let event = ScanEvent::entry(token, caller);
            match extra {
                Some(v) => event.with_vehicle_type(VehicleTypeId(parse_number("vehicle type", v)?)),
                None => event,
            }
        }
        Lane::Exit => {
            let event = ScanEvent::exit(token, caller);
            match extra {
                Some(v) => {
                    event.with_payment_method(PaymentMethodId(parse_number("payment method", v)?))
                }
                None => event,
            }
        }
    };

    Ok(event)
}

fn parse_number(field: &'static str, value: &str) -> Result<u32, ScanLineError> {
    value.parse().map_err(|_| ScanLineError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// TCP listener accepting scanner connections
pub struct ScanListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ScanListener {
    pub async fn bind(bind: &str, port: u16) -> HardwareResult<Self> {
        let listener = TcpListener::bind((bind, port)).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Scan listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept scanners until shutdown, forwarding parsed reads to `scans`
    pub async fn run(
        self,
        scans: mpsc::UnboundedSender<ScanEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scan listener shutting down");
                        return;
                    }
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            tokio::spawn(handle_scanner(
                                socket,
                                peer,
                                scans.clone(),
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept scanner connection");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_scanner(
    socket: TcpStream,
    peer: SocketAddr,
    scans: mpsc::UnboundedSender<ScanEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(peer = %peer, "Scanner connected");

    let caller = CallerIdentity::new(format!("scanner@{}", peer));
    let mut lines = BufReader::new(socket).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Scanner read failed");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match parse_scan_line(&line, caller.clone()) {
            Ok(event) => {
                debug!(peer = %peer, lane = %event.lane, token = %event.raw_token, "Scan received");
                if scans.send(event).is_err() {
                    warn!(peer = %peer, "Scan channel closed");
                    break;
                }
            }
            Err(e) => {
                warn!(peer = %peer, line = %line.trim(), error = %e, "Ignoring scanner line");
            }
        }
    }

    debug!(peer = %peer, "Scanner disconnected");
}
