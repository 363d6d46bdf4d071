//! Configuration validation

use crate::schema::RawConfig;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("min_deposit {min} exceeds max_deposit {max}")]
    DepositBoundsInverted { min: u64, max: u64 },

    #[error("max_deposit must be positive")]
    ZeroMaxDeposit,

    #[error("refund_timeout_seconds must be positive")]
    ZeroRefundTimeout,

    #[error("{field} {value} exceeds the largest storable value {}", i64::MAX)]
    ValueTooLarge { field: &'static str, value: u64 },

    #[error("service.admin is required")]
    MissingAdmin,

    #[error("Duplicate {kind} '{id}'")]
    Duplicate { kind: &'static str, id: String },

    #[error("{kind} entry has an empty {field}")]
    EmptyField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let params = &config.params;
    if params.max_deposit == 0 {
        errors.push(ValidationError::ZeroMaxDeposit);
    }
    if params.min_deposit > params.max_deposit {
        errors.push(ValidationError::DepositBoundsInverted {
            min: params.min_deposit,
            max: params.max_deposit,
        });
    }
    if params.refund_timeout_seconds == 0 {
        errors.push(ValidationError::ZeroRefundTimeout);
    }

    // Amounts and timeouts are stored as SQLite INTEGER
    for (field, value) in [
        ("max_deposit", params.max_deposit),
        ("refund_timeout_seconds", params.refund_timeout_seconds),
    ] {
        if value > i64::MAX as u64 {
            errors.push(ValidationError::ValueTooLarge { field, value });
        }
    }

    match config.service.admin.as_deref() {
        Some(admin) if !admin.trim().is_empty() => {}
        _ => errors.push(ValidationError::MissingAdmin),
    }

    let mut seen = HashSet::new();
    for vehicle in &config.vehicles {
        check_non_empty(&mut errors, "vehicle", "vehicle_ref", &vehicle.vehicle_ref);
        check_non_empty(&mut errors, "vehicle", "owner", &vehicle.owner);
        if !seen.insert(vehicle.vehicle_ref.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "vehicle",
                id: vehicle.vehicle_ref.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for charger in &config.chargers {
        check_non_empty(&mut errors, "charger", "id", &charger.id);
        check_non_empty(&mut errors, "charger", "owner", &charger.owner);
        if !seen.insert(charger.id.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "charger",
                id: charger.id.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for account in &config.accounts {
        check_non_empty(&mut errors, "account", "id", &account.id);
        if !seen.insert(account.id.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "account",
                id: account.id.clone(),
            });
        }
    }

    errors
}

fn check_non_empty(
    errors: &mut Vec<ValidationError>,
    kind: &'static str,
    field: &'static str,
    value: &str,
) {
    if value.trim().is_empty() {
        errors.push(ValidationError::EmptyField { kind, field });
    }
}
