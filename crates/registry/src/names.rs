//! In-memory name service

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use orgkit_core::{namehash, Address, Hash32};

use crate::{NameResolver, RegistryError, RegistryResult};

#[derive(Debug, Clone)]
struct NameRecord {
    name: String,
    owner: Address,
    resolved: Option<Address>,
}

/// Name service keyed by namehash
#[derive(Debug, Default)]
pub struct NameRegistry {
    records: RwLock<HashMap<Hash32, NameRecord>>,
}

impl NameRegistry {
    /// Create an empty name service
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` to `owner`, optionally pointing it at an address
    pub async fn register(&self, name: &str, owner: Address, resolved: Option<Address>) -> RegistryResult<Hash32> {
        let node = namehash(name);
        let mut records = self.records.write().await;
        if records.contains_key(&node) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        records.insert(
            node,
            NameRecord {
                name: name.to_string(),
                owner,
                resolved,
            },
        );
        debug!(name, owner = %owner, "Name registered");
        Ok(node)
    }

    /// Point a name at a new address; owner only
    pub async fn set_address(&self, sender: Address, name: &str, address: Address) -> RegistryResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&namehash(name))
            .filter(|r| r.owner == sender)
            .ok_or_else(|| RegistryError::NotOwner {
                sender,
                name: name.to_string(),
            })?;
        record.resolved = Some(address);
        debug!(name = %record.name, address = %address, "Name address updated");
        Ok(())
    }
}

#[async_trait]
impl NameResolver for NameRegistry {
    async fn resolve(&self, name: &str) -> Option<Address> {
        self.records.read().await.get(&namehash(name)).and_then(|r| r.resolved)
    }

    async fn owner(&self, node: Hash32) -> Option<Address> {
        self.records
            .read()
            .await
            .get(&node)
            .map(|r| r.owner)
            .filter(|owner| !owner.is_zero())
    }
}
