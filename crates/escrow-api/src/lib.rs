//! Protocol types for escrowd IPC
//!
//! This crate defines the stable API between escrowd and clients:
//! - Session snapshots and escrow parameters
//! - Commands (requests from clients) and responses
//! - Events (service -> clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
