//! Default paths for parkgated components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/parkgate/config.toml` or `~/.config/parkgate/config.toml`
//! - Data: `$XDG_DATA_HOME/parkgated` or `~/.local/share/parkgated`

use std::path::PathBuf;

/// Environment variable for overriding the data directory
pub const PARKGATE_DATA_DIR_ENV: &str = "PARKGATE_DATA_DIR";

/// Environment variable for overriding the config file
pub const PARKGATE_CONFIG_ENV: &str = "PARKGATE_CONFIG";

/// Application subdirectory name
const APP_DIR: &str = "parkgated";

/// Config subdirectory name
const CONFIG_DIR: &str = "parkgate";

/// Config filename
const CONFIG_FILENAME: &str = "config.toml";

/// Database filename inside the data directory
pub const DATABASE_FILENAME: &str = "parkgated.db";

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$PARKGATE_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/parkgated` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/parkgated` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(PARKGATE_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking PARKGATE_DATA_DIR.
/// Used for config defaults where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$PARKGATE_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/parkgate/config.toml`
/// 3. `~/.config/parkgate/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(PARKGATE_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home)
            .join(CONFIG_DIR)
            .join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(CONFIG_DIR).join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_contains_app_dir() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("parkgated"));
    }

    #[test]
    fn config_path_ends_with_filename() {
        let path = default_config_path();
        assert!(path.to_string_lossy().ends_with(".toml"));
    }
}
