//! Config validation CLI tool
//!
//! Validates a parkgated configuration file and reports any errors.

use parkgate_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a parkgated configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match parkgate_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", parkgate_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", config.data_dir.display());
            println!(
                "  Hub: ws://{}:{}{}",
                config.hub.bind, config.hub.port, config.hub.path
            );
            println!("  Allowed origins: {}", config.hub.allowed_origins.join(", "));
            println!(
                "  Scan listener: {}:{}",
                config.hardware.scan_bind, config.hardware.scan_port
            );
            println!("  Worker partitions: {}", config.pipeline.partitions);
            println!(
                "  Token length: {}..={}",
                config.tokens.min_len, config.tokens.max_len
            );

            println!();
            println!("Rates:");
            for policy in config.rates.policies() {
                let marker = if policy.vehicle_type_id == config.pipeline.default_vehicle_type {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "  - type {}{}: first {} / next {} / daily max {}",
                    policy.vehicle_type_id,
                    marker,
                    policy.first_hour_rate,
                    policy.next_hour_rate,
                    policy.max_daily_rate
                );
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                parkgate_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                parkgate_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                parkgate_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                parkgate_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        parkgate_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
