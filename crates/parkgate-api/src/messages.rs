//! Broadcast messages pushed to subscribers
//!
//! Wire format, one JSON text frame per message:
//! `{ "type": "...", "data": { ... }, "timestamp": "<RFC 3339>" }`

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::VehicleSession;

/// Message type tag for a recorded entry
pub const VEHICLE_ENTRY: &str = "vehicle_entry";

/// Message type tag for a completed exit
pub const VEHICLE_EXIT: &str = "vehicle_exit";

/// Prefix of the acknowledgement sent back for every inbound frame
pub const ACK_PREFIX: &str = "Server received: ";

/// Immutable message fanned out to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    message_type: String,
    data: serde_json::Value,
    #[serde(with = "rfc3339")]
    timestamp: DateTime<Local>,
}

impl BroadcastMessage {
    pub fn new(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp: parkgate_util::now(),
        }
    }

    /// Message carrying a session snapshot
    pub fn session(
        message_type: impl Into<String>,
        session: &VehicleSession,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(message_type, serde_json::to_value(session)?))
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Render as a single text frame
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Acknowledgement frame for an inbound subscriber frame
pub fn ack_frame(received: &str) -> String {
    format!("{ACK_PREFIX}{received}")
}

mod rfc3339 {
    use chrono::{DateTime, Local};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&parkgate_util::format_timestamp(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Local))
            .map_err(serde::de::Error::custom)
    }
}
