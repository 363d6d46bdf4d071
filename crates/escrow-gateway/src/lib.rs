//! External collaborator interfaces for escrowd
//!
//! The escrow engine never owns identity, charger or balance data. It talks
//! to three collaborators through the traits defined here:
//! - [`IdentityRegistry`]: vehicle reference -> registered owner
//! - [`ProviderRegistry`]: charger id -> owner and active flag
//! - [`LedgerGateway`]: pulls deposits into escrow and pays them out
//!
//! In-memory implementations are provided for the service and for tests.

mod memory;
mod traits;

pub use memory::*;
pub use traits::*;
