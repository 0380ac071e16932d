//! Shared types for the parkgated data model

use chrono::{DateTime, Local};
use parkgate_util::{IdentifierToken, PaymentMethodId, SessionId, TicketNumber, VehicleTypeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in the facility's minor currency unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_mul(self, factor: u64) -> Amount {
        Amount(self.0.saturating_mul(factor))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tiered pricing rule for one vehicle type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub vehicle_type_id: VehicleTypeId,
    pub first_hour_rate: Amount,
    pub next_hour_rate: Amount,
    pub max_daily_rate: Amount,
}

/// Lifecycle status of a vehicle session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

/// Reference to a captured image (path or URL, opaque to the core)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Placeholder recorded when the lane has no camera
    pub fn unavailable() -> Self {
        Self("unavailable".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One vehicle's occupancy record from entry to exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSession {
    pub id: SessionId,
    pub identifier: IdentifierToken,
    pub vehicle_type_id: VehicleTypeId,
    pub entry_time: DateTime<Local>,
    pub exit_time: Option<DateTime<Local>>,
    pub entry_image_ref: ImageRef,
    pub exit_image_ref: Option<ImageRef>,
    /// Set if and only if the session is closed
    pub fee: Option<Amount>,
    pub payment_method_id: Option<PaymentMethodId>,
    pub ticket_number: TicketNumber,
    pub status: SessionStatus,
}

impl VehicleSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Time parked, for closed sessions
    pub fn parked_for(&self) -> Option<std::time::Duration> {
        self.exit_time
            .and_then(|exit| (exit - self.entry_time).to_std().ok())
    }
}

/// Which physical lane a hardware event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Entry,
    Exit,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Entry => "entry",
            Lane::Exit => "exit",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who triggered a pipeline run (operator login, device name, peer address)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub name: String,
}

impl CallerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Identity used for events raised by the service itself
    pub fn system() -> Self {
        Self::new("system")
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
