//! orgkit
//!
//! Provisioning and token-weighted governance of multi-body organizations.
//! This crate re-exports the workspace members.

/// Module version information
pub mod version {
    /// The current version of the orgkit library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

pub use orgkit_acl as acl;
pub use orgkit_apps as apps;
pub use orgkit_config as config;
pub use orgkit_core as core;
pub use orgkit_governance as governance;
pub use orgkit_kernel as kernel;
pub use orgkit_kit as kit;
pub use orgkit_ledger as ledger;
pub use orgkit_registry as registry;

/// The types most callers need
pub mod prelude {
    pub use orgkit_config::KitConfig;
    pub use orgkit_core::{Action, ActionScript, Address, BlockClock, CallContext, Chain, MemoryStorage, Pct};
    pub use orgkit_governance::{Voting, VotingCall};
    pub use orgkit_kit::{publish_required_apps, KitError, OrgKit, Phase1Receipt, Phase2Receipt};
    pub use orgkit_ledger::{CheckpointLedger, TokenLedger};
    pub use orgkit_registry::{NameRegistry, PackageIndex};
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_available() {
        assert!(!super::version::VERSION.is_empty());
    }
}
