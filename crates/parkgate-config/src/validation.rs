//! Configuration validation

use crate::schema::{RawConfig, RawRate};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Rate for vehicle type {vehicle_type}: {message}")]
    RateError { vehicle_type: u32, message: String },

    #[error("Duplicate rate for vehicle type {0}")]
    DuplicateVehicleType(u32),

    #[error("No rates configured")]
    NoRates,

    #[error("Default vehicle type {0} has no rate")]
    MissingDefaultRate(u32),

    #[error("Invalid token length bounds {min_len}..={max_len}")]
    InvalidTokenBounds { min_len: usize, max_len: usize },

    #[error("Invalid URL '{value}': {message}")]
    InvalidUrl { value: String, message: String },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.rates.is_empty() {
        errors.push(ValidationError::NoRates);
    }

    let mut seen_types = HashSet::new();
    for rate in &config.rates {
        if !seen_types.insert(rate.vehicle_type) {
            errors.push(ValidationError::DuplicateVehicleType(rate.vehicle_type));
        }
        errors.extend(validate_rate(rate));
    }

    let default_type = config
        .pipeline
        .default_vehicle_type
        .unwrap_or(crate::DEFAULT_VEHICLE_TYPE);
    if !config.rates.is_empty() && !seen_types.contains(&default_type) {
        errors.push(ValidationError::MissingDefaultRate(default_type));
    }

    let min_len = config.tokens.min_len.unwrap_or(crate::DEFAULT_TOKEN_MIN_LEN);
    let max_len = config.tokens.max_len.unwrap_or(crate::DEFAULT_TOKEN_MAX_LEN);
    if min_len == 0 || min_len > max_len {
        errors.push(ValidationError::InvalidTokenBounds { min_len, max_len });
    }

    if let Some(path) = &config.hub.path
        && !path.starts_with('/')
    {
        errors.push(ValidationError::GlobalError(format!(
            "hub.path '{}' must start with '/'",
            path
        )));
    }

    if let Some(origins) = &config.hub.allowed_origins
        && origins.is_empty()
    {
        errors.push(ValidationError::GlobalError(
            "hub.allowed_origins cannot be empty (use [\"*\"] to allow any)".into(),
        ));
    }

    for (name, value) in [
        ("hub.send_timeout_ms", config.hub.send_timeout_ms),
        ("hub.handshake_timeout_ms", config.hub.handshake_timeout_ms),
        ("pipeline.store_timeout_ms", config.pipeline.store_timeout_ms),
        ("hardware.request_timeout_ms", config.hardware.request_timeout_ms),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::GlobalError(format!("{} must be > 0", name)));
        }
    }

    if config.pipeline.partitions == Some(0) {
        errors.push(ValidationError::GlobalError(
            "pipeline.partitions must be >= 1".into(),
        ));
    }

    let hw = &config.hardware;
    for url in [
        &hw.entry_gate_url,
        &hw.exit_gate_url,
        &hw.entry_camera_url,
        &hw.exit_camera_url,
    ]
    .into_iter()
    .flatten()
    {
        if let Err(message) = check_http_url(url) {
            errors.push(ValidationError::InvalidUrl {
                value: url.clone(),
                message,
            });
        }
    }

    errors
}

fn validate_rate(rate: &RawRate) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if rate.max_daily == 0 {
        errors.push(ValidationError::RateError {
            vehicle_type: rate.vehicle_type,
            message: "max_daily must be > 0".into(),
        });
    }

    if let Some(label) = &rate.label
        && label.trim().is_empty()
    {
        errors.push(ValidationError::RateError {
            vehicle_type: rate.vehicle_type,
            message: "label cannot be empty".into(),
        });
    }

    errors
}

/// Check that a device URL is plain http(s) with a host
pub fn check_http_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| "Expected http:// or https:// scheme".to_string())?;

    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    if host.is_empty() {
        return Err("Missing host".into());
    }

    Ok(())
}
