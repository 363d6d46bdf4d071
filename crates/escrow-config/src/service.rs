//! Validated service configuration

use crate::schema::{RawAccount, RawCharger, RawConfig, RawVehicle};
use escrow_api::{Amount, Params};
use escrow_util::{AccountId, ChargerId, VehicleRef};
use std::path::PathBuf;
use std::time::Duration;

/// Fully validated configuration, ready for the daemon
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service: ServiceSettings,

    /// Parameters used to seed an empty store
    pub initial_params: Params,

    pub vehicles: Vec<VehicleRegistration>,
    pub chargers: Vec<ChargerRegistration>,
    pub accounts: Vec<AccountSeed>,
}

impl ServiceConfig {
    pub(crate) fn from_raw(raw: RawConfig) -> Self {
        // Validation guarantees an admin is present
        let admin = raw.service.admin.unwrap_or_default();

        Self {
            service: ServiceSettings {
                socket_path: raw.service.socket_path,
                data_dir: raw.service.data_dir,
                admin: AccountId::new(admin.trim()),
            },
            initial_params: Params {
                min_deposit: raw.params.min_deposit,
                max_deposit: raw.params.max_deposit,
                refund_timeout: Duration::from_secs(raw.params.refund_timeout_seconds),
            },
            vehicles: raw.vehicles.into_iter().map(VehicleRegistration::from).collect(),
            chargers: raw.chargers.into_iter().map(ChargerRegistration::from).collect(),
            accounts: raw.accounts.into_iter().map(AccountSeed::from).collect(),
        }
    }
}

/// Service-level settings; unset paths fall back to the environment defaults
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub socket_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub admin: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRegistration {
    pub vehicle_ref: VehicleRef,
    pub owner: AccountId,
}

impl From<RawVehicle> for VehicleRegistration {
    fn from(raw: RawVehicle) -> Self {
        Self {
            vehicle_ref: VehicleRef::new(raw.vehicle_ref),
            owner: AccountId::new(raw.owner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargerRegistration {
    pub id: ChargerId,
    pub owner: AccountId,
    pub active: bool,
}

impl From<RawCharger> for ChargerRegistration {
    fn from(raw: RawCharger) -> Self {
        Self {
            id: ChargerId::new(raw.id),
            owner: AccountId::new(raw.owner),
            active: raw.active,
        }
    }
}

/// Opening ledger position for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSeed {
    pub id: AccountId,
    pub balance: Amount,
    pub allowance: Amount,
    pub uid: Option<u32>,
}

impl From<RawAccount> for AccountSeed {
    fn from(raw: RawAccount) -> Self {
        Self {
            id: AccountId::new(raw.id),
            balance: raw.balance,
            allowance: raw.allowance,
            uid: raw.uid,
        }
    }
}
