//! Registries consulted when provisioning an organization
//!
//! The name service maps dotted names (hashed with `namehash`) to an owner
//! and a resolved address. The package index keeps the published versions
//! of each application, keyed by the namehash of its package name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use orgkit_core::{Address, Hash32};

pub mod names;
pub mod packages;

pub use names::NameRegistry;
pub use packages::PackageIndex;

/// Error types for registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The name already has an owner
    #[error("Name already registered: {0}")]
    NameTaken(String),

    /// Only the owner of a name may change it
    #[error("{sender} does not own {name}")]
    NotOwner { sender: Address, name: String },

    /// Published versions must strictly increase
    #[error("Version {new} of {app_id} does not follow {latest}")]
    VersionNotIncreasing {
        app_id: Hash32,
        latest: SemanticVersion,
        new: SemanticVersion,
    },
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemanticVersion(pub u16, pub u16, pub u16);

impl SemanticVersion {
    /// Big-endian encoding used when hashing installation ids
    pub fn to_bytes(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[0..2].copy_from_slice(&self.0.to_be_bytes());
        out[2..4].copy_from_slice(&self.1.to_be_bytes());
        out[4..6].copy_from_slice(&self.2.to_be_bytes());
        out
    }
}

impl std::fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// A published application version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    /// Package identifier (namehash of the package name)
    pub app_id: Hash32,
    /// Version number
    pub version: SemanticVersion,
    /// Content reference of the application code
    pub code_ref: Hash32,
}

impl PackageVersion {
    /// Identifier of instances installed from this version: `sha256(app_id || version)`
    pub fn installation_id(&self) -> Hash32 {
        let mut data = Vec::with_capacity(32 + 6);
        data.extend_from_slice(self.app_id.as_bytes());
        data.extend_from_slice(&self.version.to_bytes());
        orgkit_core::sha256(&data)
    }
}

/// Name resolution service
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Address a name resolves to
    async fn resolve(&self, name: &str) -> Option<Address>;

    /// Owner of a name node, if registered
    async fn owner(&self, node: Hash32) -> Option<Address>;
}

/// Package registry
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Latest published version of an application
    async fn latest_version(&self, app_id: Hash32) -> Option<PackageVersion>;
}
