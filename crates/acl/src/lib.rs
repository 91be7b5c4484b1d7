//! Capability graph for orgkit
//!
//! Every permission is a `(resource, action)` pair with exactly one manager
//! and a set of grantees. Only the manager may grant, revoke, or hand the
//! pair to a new manager. A manager of `Address::ZERO` means no one can
//! ever change the pair again.
//!
//! New pairs may only be created by holders of `CREATE_PERMISSIONS` on the
//! graph root, so whoever manages that capability controls all future
//! grants in the organization.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use orgkit_core::{downcast_image, Address, RevertError, Revertible, StateImage};

pub mod roles;

/// Error types for capability graph operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    /// The sender may not perform this change
    #[error("Unauthorized: {sender} cannot manage {action} on {resource}")]
    Unauthorized {
        sender: Address,
        resource: Address,
        action: String,
    },

    /// The pair already has a manager
    #[error("Permission {action} on {resource} already exists")]
    PermissionExists { resource: Address, action: String },

    /// The pair was never created
    #[error("Permission {action} on {resource} does not exist")]
    PermissionMissing { resource: Address, action: String },

    /// The graph root was already handed out
    #[error("Capability graph {0} is already initialized")]
    AlreadyInitialized(Address),
}

/// Result type for capability graph operations
pub type AclResult<T> = Result<T, AclError>;

/// A resource+action authorization record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    /// The resource the capability applies to
    pub resource: Address,
    /// Name of the capability
    pub action: String,
    /// The sole principal allowed to change this grant (`ZERO` when frozen)
    pub manager: Address,
    /// Principals holding the capability
    pub grantees: BTreeSet<Address>,
}

/// Capability graph changes submitted as calldata, e.g. from a vote's script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AclCall {
    CreatePermission {
        grantee: Address,
        resource: Address,
        action: String,
        manager: Address,
    },
    GrantPermission {
        grantee: Address,
        resource: Address,
        action: String,
    },
    RevokePermission {
        grantee: Address,
        resource: Address,
        action: String,
    },
    SetPermissionManager {
        new_manager: Address,
        resource: Address,
        action: String,
    },
}

/// The capability graph interface consumed by applications and the kit
#[async_trait]
pub trait CapabilityGraph: Revertible {
    /// Address of the graph itself; `CREATE_PERMISSIONS` lives on it
    fn root(&self) -> Address;

    /// Hand `CREATE_PERMISSIONS` (grant and manager) to `holder`; only once
    async fn initialize(&self, holder: Address) -> AclResult<()>;

    /// Create a new pair with one grantee and a manager
    async fn create_permission(
        &self,
        sender: Address,
        grantee: Address,
        resource: Address,
        action: &str,
        manager: Address,
    ) -> AclResult<()>;

    /// Add a grantee to an existing pair
    async fn grant_permission(
        &self,
        sender: Address,
        grantee: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<()>;

    /// Remove a grantee from an existing pair
    async fn revoke_permission(
        &self,
        sender: Address,
        grantee: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<()>;

    /// Hand the pair to a new manager; `Address::ZERO` freezes it
    async fn set_permission_manager(
        &self,
        sender: Address,
        new_manager: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<()>;

    /// Manager of a pair, if it exists
    async fn get_permission_manager(&self, resource: Address, action: &str) -> Option<Address>;

    /// Whether `who` holds `action` on `resource`
    async fn has_permission(&self, who: Address, resource: Address, action: &str) -> bool;

    /// Every grant in the graph, ordered by resource then action
    async fn grants(&self) -> Vec<CapabilityGrant>;

    /// Apply a call on behalf of `sender`
    async fn apply(&self, sender: Address, call: AclCall) -> AclResult<()> {
        match call {
            AclCall::CreatePermission {
                grantee,
                resource,
                action,
                manager,
            } => self.create_permission(sender, grantee, resource, &action, manager).await,
            AclCall::GrantPermission {
                grantee,
                resource,
                action,
            } => self.grant_permission(sender, grantee, resource, &action).await,
            AclCall::RevokePermission {
                grantee,
                resource,
                action,
            } => self.revoke_permission(sender, grantee, resource, &action).await,
            AclCall::SetPermissionManager {
                new_manager,
                resource,
                action,
            } => self.set_permission_manager(sender, new_manager, resource, &action).await,
        }
    }
}

type PermissionKey = (Address, String);

#[derive(Debug, Clone)]
struct PermissionEntry {
    manager: Address,
    grantees: BTreeSet<Address>,
}

/// In-memory capability graph
#[derive(Debug)]
pub struct Acl {
    root: Address,
    entries: RwLock<HashMap<PermissionKey, PermissionEntry>>,
}

impl Acl {
    /// Create an empty graph whose root lives at `root`
    pub fn new(root: Address) -> Self {
        Self {
            root,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(resource: Address, action: &str) -> PermissionKey {
        (resource, action.to_string())
    }

    fn unauthorized(sender: Address, resource: Address, action: &str) -> AclError {
        AclError::Unauthorized {
            sender,
            resource,
            action: action.to_string(),
        }
    }

    fn missing(resource: Address, action: &str) -> AclError {
        AclError::PermissionMissing {
            resource,
            action: action.to_string(),
        }
    }

    /// Look up an entry the sender manages
    fn managed_entry<'a>(
        entries: &'a mut HashMap<PermissionKey, PermissionEntry>,
        sender: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<&'a mut PermissionEntry> {
        let entry = entries
            .get_mut(&Self::key(resource, action))
            .ok_or_else(|| Self::missing(resource, action))?;
        if entry.manager.is_zero() || entry.manager != sender {
            return Err(Self::unauthorized(sender, resource, action));
        }
        Ok(entry)
    }
}

#[async_trait]
impl CapabilityGraph for Acl {
    fn root(&self) -> Address {
        self.root
    }

    async fn initialize(&self, holder: Address) -> AclResult<()> {
        let mut entries = self.entries.write().await;
        let key = Self::key(self.root, roles::CREATE_PERMISSIONS);
        if entries.contains_key(&key) {
            return Err(AclError::AlreadyInitialized(self.root));
        }
        entries.insert(
            key,
            PermissionEntry {
                manager: holder,
                grantees: BTreeSet::from([holder]),
            },
        );
        info!(root = %self.root, holder = %holder, "Capability graph initialized");
        Ok(())
    }

    async fn create_permission(
        &self,
        sender: Address,
        grantee: Address,
        resource: Address,
        action: &str,
        manager: Address,
    ) -> AclResult<()> {
        let mut entries = self.entries.write().await;

        let may_create = entries
            .get(&Self::key(self.root, roles::CREATE_PERMISSIONS))
            .map(|root| root.grantees.contains(&sender))
            .unwrap_or(false);
        if !may_create {
            return Err(Self::unauthorized(sender, self.root, roles::CREATE_PERMISSIONS));
        }

        let key = Self::key(resource, action);
        if entries.contains_key(&key) {
            return Err(AclError::PermissionExists {
                resource,
                action: action.to_string(),
            });
        }

        entries.insert(
            key,
            PermissionEntry {
                manager,
                grantees: BTreeSet::from([grantee]),
            },
        );
        debug!(
            resource = %resource,
            action,
            grantee = %grantee,
            manager = %manager,
            "Permission created"
        );
        Ok(())
    }

    async fn grant_permission(
        &self,
        sender: Address,
        grantee: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<()> {
        let mut entries = self.entries.write().await;
        let entry = Self::managed_entry(&mut entries, sender, resource, action)?;
        entry.grantees.insert(grantee);
        debug!(resource = %resource, action, grantee = %grantee, "Permission granted");
        Ok(())
    }

    async fn revoke_permission(
        &self,
        sender: Address,
        grantee: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<()> {
        let mut entries = self.entries.write().await;
        let entry = Self::managed_entry(&mut entries, sender, resource, action)?;
        entry.grantees.remove(&grantee);
        debug!(resource = %resource, action, grantee = %grantee, "Permission revoked");
        Ok(())
    }

    async fn set_permission_manager(
        &self,
        sender: Address,
        new_manager: Address,
        resource: Address,
        action: &str,
    ) -> AclResult<()> {
        let mut entries = self.entries.write().await;
        let entry = Self::managed_entry(&mut entries, sender, resource, action)?;
        entry.manager = new_manager;
        if new_manager.is_zero() {
            info!(resource = %resource, action, "Permission manager frozen");
        } else {
            debug!(resource = %resource, action, manager = %new_manager, "Permission manager changed");
        }
        Ok(())
    }

    async fn get_permission_manager(&self, resource: Address, action: &str) -> Option<Address> {
        self.entries
            .read()
            .await
            .get(&Self::key(resource, action))
            .map(|entry| entry.manager)
    }

    async fn has_permission(&self, who: Address, resource: Address, action: &str) -> bool {
        self.entries
            .read()
            .await
            .get(&Self::key(resource, action))
            .map(|entry| entry.grantees.contains(&who))
            .unwrap_or(false)
    }

    async fn grants(&self) -> Vec<CapabilityGrant> {
        let entries = self.entries.read().await;
        let mut grants: Vec<CapabilityGrant> = entries
            .iter()
            .map(|((resource, action), entry)| CapabilityGrant {
                resource: *resource,
                action: action.clone(),
                manager: entry.manager,
                grantees: entry.grantees.clone(),
            })
            .collect();
        grants.sort_by(|a, b| (a.resource, &a.action).cmp(&(b.resource, &b.action)));
        grants
    }
}

#[async_trait]
impl Revertible for Acl {
    async fn save_state(&self) -> StateImage {
        Box::new(self.entries.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        let entries = downcast_image::<HashMap<PermissionKey, PermissionEntry>>(image, "acl")?;
        *self.entries.write().await = entries;
        Ok(())
    }
}
