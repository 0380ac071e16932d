//! Shared utilities for parkgated
//!
//! This crate provides:
//! - ID types (IdentifierToken, SessionId, SubscriberId, TicketNumber, ...)
//! - Clock helpers (wall-clock `now`, mock time, epoch conversions)
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
