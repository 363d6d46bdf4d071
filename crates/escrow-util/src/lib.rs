//! Shared utilities for escrowd
//!
//! This crate provides:
//! - ID types (AccountId, VehicleRef, ChargerId, SessionId, ClientId)
//! - Wall-clock helpers and deadline arithmetic
//! - Rate limiting helpers
//! - Default paths for socket, config, and data directories

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
