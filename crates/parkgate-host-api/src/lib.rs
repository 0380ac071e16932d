//! Hardware adapter trait interfaces for parkgated
//!
//! This crate defines the capability-based interface between the pipeline
//! core and the lane hardware (scanners, cameras, gate barriers). It contains
//! no device code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
