//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Initial escrow parameters
    pub params: RawParams,

    /// Vehicle registrations for the built-in identity registry
    #[serde(default)]
    pub vehicles: Vec<RawVehicle>,

    /// Charger registrations for the built-in provider registry
    #[serde(default)]
    pub chargers: Vec<RawCharger>,

    /// Opening balances for the built-in ledger
    #[serde(default)]
    pub accounts: Vec<RawAccount>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Identity of the arbitrator allowed to resolve disputes and update params
    pub admin: Option<String>,
}

/// Escrow parameters, applied on first start only
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawParams {
    pub min_deposit: u64,
    pub max_deposit: u64,
    pub refund_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawVehicle {
    pub vehicle_ref: String,
    pub owner: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCharger {
    pub id: String,
    pub owner: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAccount {
    pub id: String,
    #[serde(default)]
    pub balance: u64,
    /// Standing authorization granted to the escrow
    #[serde(default)]
    pub allowance: u64,
    /// Local user allowed to act as this account over the socket
    #[serde(default)]
    pub uid: Option<u32>,
}

fn default_active() -> bool {
    true
}
