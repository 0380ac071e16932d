//! Hardware adapter traits

use async_trait::async_trait;
use parkgate_api::{CallerIdentity, ImageRef, Lane};
use parkgate_util::{PaymentMethodId, VehicleTypeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from hardware operations
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Image capture failed on {lane} lane: {reason}")]
    CaptureFailed { lane: Lane, reason: String },

    #[error("Gate barrier failed on {lane} lane: {reason}")]
    GateFailed { lane: Lane, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HardwareResult<T> = Result<T, HardwareError>;

/// A token read by a lane scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub lane: Lane,

    /// Token text exactly as the scanner reported it
    pub raw_token: String,

    /// Vehicle category selected at the entry lane, if any
    pub vehicle_type_id: Option<VehicleTypeId>,

    /// Payment method selected at the exit lane, if any
    pub payment_method_id: Option<PaymentMethodId>,

    pub caller: CallerIdentity,
}

impl ScanEvent {
    pub fn entry(raw_token: impl Into<String>, caller: CallerIdentity) -> Self {
        Self {
            lane: Lane::Entry,
            raw_token: raw_token.into(),
            vehicle_type_id: None,
            payment_method_id: None,
            caller,
        }
    }

    pub fn exit(raw_token: impl Into<String>, caller: CallerIdentity) -> Self {
        Self {
            lane: Lane::Exit,
            raw_token: raw_token.into(),
            vehicle_type_id: None,
            payment_method_id: None,
            caller,
        }
    }

    pub fn with_vehicle_type(mut self, vehicle_type_id: VehicleTypeId) -> Self {
        self.vehicle_type_id = Some(vehicle_type_id);
        self
    }

    pub fn with_payment_method(mut self, payment_method_id: PaymentMethodId) -> Self {
        self.payment_method_id = Some(payment_method_id);
        self
    }
}

/// Hardware adapter trait - implemented by device integrations
#[async_trait]
pub trait HardwareAdapter: Send + Sync {
    /// Subscribe to scan events. The stream is handed out once.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ScanEvent>;

    /// Capture a still image of the vehicle in `lane`
    async fn capture_image(&self, lane: Lane) -> HardwareResult<ImageRef>;

    /// Raise the barrier of `lane`
    async fn open_gate_barrier(&self, lane: Lane) -> HardwareResult<()>;

    /// Optional: check if the hardware is reachable
    fn is_healthy(&self) -> bool {
        true
    }
}
