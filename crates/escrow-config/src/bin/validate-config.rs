//! Config validation CLI tool
//!
//! Validates an escrowd configuration file and reports any errors.

use escrow_config::ConfigError;
use escrow_util::{default_config_path, format_duration};
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
            eprintln!("Validates an escrowd configuration file.");
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

    match escrow_config::load_config(&config_path) {
        Ok(config) => {
            let params = &config.initial_params;
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", escrow_config::CURRENT_CONFIG_VERSION);
            println!("  Admin: {}", config.service.admin);
            println!(
                "  Deposit bounds: {}..={}",
                params.min_deposit, params.max_deposit
            );
            println!("  Refund timeout: {}", format_duration(params.refund_timeout));
            println!("  Vehicles: {}", config.vehicles.len());
            println!("  Accounts: {}", config.accounts.len());

            if !config.chargers.is_empty() {
                println!();
                println!("Chargers:");
                for charger in &config.chargers {
                    let status = if charger.active { "active" } else { "inactive" };
                    println!("  - {} [{}]: owner {}", charger.id, status, charger.owner);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        escrow_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
