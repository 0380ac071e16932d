//! Shared data model for parkgated
//!
//! This crate defines the types exchanged between the service crates and
//! with broadcast subscribers:
//! - Vehicle sessions and their status
//! - Rate policies and amounts
//! - Broadcast messages (the subscriber wire format)

mod messages;
mod types;

pub use messages::*;
pub use types::*;
