//! Core pipelines for parkgated
//!
//! This crate is the heart of parkgated, containing:
//! - Fee computation from a tiered rate policy
//! - Identifier token validation
//! - The exit state machine (Idle -> Validated -> Matched -> FeeComputed ->
//!   Persisted -> GateTriggered -> Broadcasted -> Completed, or Aborted)
//! - The entry pipeline
//! - Scan dispatch partitioned by identifier

mod dispatch;
mod entry;
mod events;
mod exit;
mod fee;
mod matcher;
mod pipeline;

pub use dispatch::*;
pub use entry::*;
pub use events::*;
pub use exit::*;
pub use fee::*;
pub use matcher::*;
pub use pipeline::*;
