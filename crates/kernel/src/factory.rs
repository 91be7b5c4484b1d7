//! Organization factory

use std::sync::Arc;

use tracing::info;

use orgkit_acl::{roles, Acl, CapabilityGraph};
use orgkit_core::{sha256, Address, AppKind, CallContext, Chain};
use orgkit_ledger::TokenLedger;

use crate::acl_gateway::AclGateway;
use crate::organization::Organization;
use crate::script_registry::ScriptRegistry;
use crate::KernelResult;

/// Builds the capability graph of a new organization from its root address
pub type AclProvider = Box<dyn Fn(Address) -> Arc<dyn CapabilityGraph> + Send + Sync>;

/// Creates organizations
pub struct OrganizationFactory {
    address: Address,
    chain: Chain,
    ledger: Arc<dyn TokenLedger>,
    acl_provider: AclProvider,
}

impl OrganizationFactory {
    /// Create a factory whose organizations use the in-memory `Acl`
    pub fn new(address: Address, chain: Chain, ledger: Arc<dyn TokenLedger>) -> Self {
        Self {
            address,
            chain,
            ledger,
            acl_provider: Box::new(|root| Arc::new(Acl::new(root)) as Arc<dyn CapabilityGraph>),
        }
    }

    /// Substitute the capability graph implementation
    pub fn with_acl_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn(Address) -> Arc<dyn CapabilityGraph> + Send + Sync + 'static,
    {
        self.acl_provider = Box::new(provider);
        self
    }

    /// Address of the factory
    pub fn address(&self) -> Address {
        self.address
    }

    /// Create an organization rooted at `ctx.sender`
    ///
    /// The sender ends up holding and managing `CREATE_PERMISSIONS`,
    /// `APP_MANAGER`, and both script registry roles.
    pub async fn create(&self, ctx: &CallContext) -> KernelResult<Arc<Organization>> {
        let root = ctx.sender;
        let address = self.chain.allocate_address(&self.address);
        let acl_root = self.chain.allocate_address(&address);
        let registry_address = self.chain.allocate_address(&address);

        let acl = (self.acl_provider)(acl_root);
        acl.initialize(root).await?;
        acl.create_permission(root, root, address, roles::APP_MANAGER, root).await?;
        acl.create_permission(root, root, registry_address, roles::ADD_EXECUTOR, root).await?;
        acl.create_permission(root, root, registry_address, roles::REGISTRY_MANAGER, root).await?;

        let org = Organization::new(address, self.chain.clone(), acl.clone(), self.ledger.clone(), registry_address);
        org.install_system(acl_root, sha256(AppKind::Acl.label().as_bytes()), |_| AclGateway::new(acl))
            .await;
        org.install_system(
            registry_address,
            sha256(AppKind::ScriptRegistry.label().as_bytes()),
            ScriptRegistry::new,
        )
        .await;

        info!(organization = %address, root = %root, block = ctx.block_number, "Organization created");
        Ok(org)
    }
}
