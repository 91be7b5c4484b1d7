//! In-memory package index

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use orgkit_core::{sha256, Hash32};

use crate::{PackageRegistry, PackageVersion, RegistryError, RegistryResult, SemanticVersion};

/// Published versions per application id
#[derive(Debug, Default)]
pub struct PackageIndex {
    versions: RwLock<HashMap<Hash32, Vec<PackageVersion>>>,
}

impl PackageIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new version of an application
    ///
    /// The code reference is the hash of the supplied code bytes.
    pub async fn publish(&self, app_id: Hash32, version: SemanticVersion, code: &[u8]) -> RegistryResult<PackageVersion> {
        let mut versions = self.versions.write().await;
        let history = versions.entry(app_id).or_default();
        if let Some(latest) = history.last() {
            if latest.version >= version {
                return Err(RegistryError::VersionNotIncreasing {
                    app_id,
                    latest: latest.version,
                    new: version,
                });
            }
        }

        let published = PackageVersion {
            app_id,
            version,
            code_ref: sha256(code),
        };
        history.push(published.clone());
        info!(app_id = %app_id, version = %version, "Package version published");
        Ok(published)
    }

    /// Every published version of an application, oldest first
    pub async fn versions(&self, app_id: Hash32) -> Vec<PackageVersion> {
        self.versions.read().await.get(&app_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PackageRegistry for PackageIndex {
    async fn latest_version(&self, app_id: Hash32) -> Option<PackageVersion> {
        self.versions.read().await.get(&app_id).and_then(|v| v.last().cloned())
    }
}
