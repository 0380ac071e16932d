//! Networked lane hardware for parkgated
//!
//! This crate provides:
//! - A TCP line listener for lane scanners
//! - HTTP gate relays, with credentials taken from the relay URL
//! - HTTP snapshot cameras writing images under the data directory
//! - [`NetHardware`], the [`HardwareAdapter`](parkgate_host_api::HardwareAdapter)
//!   built from those pieces

mod adapter;
mod camera;
mod relay;
mod scan;

pub use adapter::*;
pub use camera::*;
pub use relay::*;
pub use scan::*;
