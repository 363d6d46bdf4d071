//! Escrow engine and session state machine for escrowd
//!
//! This crate is the heart of escrowd, containing:
//! - Session state machine (Active -> Proposed -> Disputed -> Settled, or Active -> Refunded)
//! - Guards for every operation, evaluated before any funds move
//! - Per-session serialization and dense id allocation
//! - Timeout eligibility computed from the caller-supplied clock

mod engine;
mod error;
mod events;
mod session;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use session::*;
