//! Configuration parsing and validation for parkgated
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Rate policies per vehicle type
//! - Hub listener, pipeline and lane hardware settings
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    let default_type = raw
        .pipeline
        .default_vehicle_type
        .unwrap_or(DEFAULT_VEHICLE_TYPE);
    Config::from_raw(raw).ok_or(ConfigError::ValidationFailed {
        errors: vec![ValidationError::MissingDefaultRate(default_type)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkgate_api::Amount;
    use parkgate_util::VehicleTypeId;
    use std::io::Write;
    use std::time::Duration;

    const MINIMAL: &str = r#"
        config_version = 1

        [[rates]]
        vehicle_type = 1
        first_hour = 5000
        next_hour = 3000
        max_daily = 40000
    "#;

    #[test]
    fn parse_minimal_config() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.hub.port, 5000);
        assert_eq!(config.hub.path, "/ws");
        assert_eq!(config.hub.allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.hub.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.hardware.scan_port, 25900);
        assert_eq!(config.pipeline.store_timeout, Duration::from_secs(5));
        assert_eq!(
            config.rates.policy_for(VehicleTypeId(1)).max_daily_rate,
            Amount(40000)
        );
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config(&MINIMAL.replace("config_version = 1", "config_version = 99"));
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid() {
        let result = parse_config("config_version = 1");
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        file.write_all(b"\n[service]\ndata_dir = \"/srv/parkgated\"\n").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config.database_path(),
            std::path::PathBuf::from("/srv/parkgated/parkgated.db")
        );
        assert_eq!(config.images_dir(), std::path::PathBuf::from("/srv/parkgated/images"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = load_config("/nonexistent/parkgate/config.toml");
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse_config(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(config.hub.port, 5000);
        assert_eq!(config.rates.len(), 2);
        assert!(config.hardware.exit_gate_url.is_some());
    }
}
