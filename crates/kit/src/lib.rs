//! Organization provisioning for orgkit
//!
//! `OrgKit` builds a governed organization in two dependent phases. Phase 1
//! creates the organization with its treasury, the membership cohort and
//! its two voting engines. Phase 2, which only the phase-1 initiator can
//! run, adds the council cohort and the agents and hands every remaining
//! capability from the kit to the organization's own voting engines.

use thiserror::Error;

use orgkit_acl::AclError;
use orgkit_apps::AppError;
use orgkit_config::ConfigError;
use orgkit_core::{Address, AppKind, StorageError};
use orgkit_governance::VotingError;
use orgkit_kernel::KernelError;
use orgkit_ledger::LedgerError;
use orgkit_registry::RegistryError;

pub mod bootstrap;
pub mod kit;
pub mod session;

pub use bootstrap::publish_required_apps;
pub use kit::{OrgKit, Phase1Receipt, Phase2Receipt};
pub use session::{ContinuationToken, ProvisioningSession, SessionSigner, SessionStatus};

/// Error types for provisioning
#[derive(Error, Debug)]
pub enum KitError {
    /// The registry domain does not resolve in the name service
    #[error("Missing registry entry: {0}")]
    MissingRegistryEntry(String),

    /// A required application kind has no owner or no published version
    #[error("Unresolved application kind: {0}")]
    UnresolvedApplicationKind(AppKind),

    /// A cohort needs at least one holder
    #[error("The {0} cohort has no holders")]
    EmptyCohort(String),

    /// Phase 2 was submitted by someone other than the phase-1 initiator
    #[error("{sender} cannot complete provisioning started by {initiator}")]
    UnauthorizedCompletion { sender: Address, initiator: Address },

    /// The continuation token does not match the supplied addresses
    #[error("Invalid continuation token")]
    InvalidContinuation,

    /// No provisioning was started for this organization
    #[error("Unknown provisioning session: {0}")]
    UnknownSession(Address),

    /// Phase 2 already ran for this organization
    #[error("Provisioning of {0} is already completed")]
    AlreadyCompleted(Address),

    /// An earlier phase 2 failed after it began wiring
    #[error("Provisioning of {0} was interrupted and needs manual remediation")]
    InterruptedCompletion(Address),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Capability graph error: {0}")]
    Acl(#[from] AclError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Application error: {0}")]
    App(#[from] AppError),

    #[error("Voting error: {0}")]
    Voting(#[from] VotingError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Result type for provisioning
pub type KitResult<T> = Result<T, KitError>;
