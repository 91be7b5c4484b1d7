//! Organization container

use std::any::Any;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tracing::{debug, info};

use orgkit_acl::{roles, CapabilityGraph};
use orgkit_core::{
    downcast_image, ActionExecutor, Address, Application, CallContext, Chain, Hash32, RevertError, Revertible,
    StateImage,
};
use orgkit_ledger::TokenLedger;
use orgkit_registry::PackageVersion;

use crate::executor::OrgExecutor;
use crate::script_registry::ScriptRegistry;
use crate::{AppInstance, InstallEnv, KernelError, KernelResult};

struct InstalledApp {
    instance: AppInstance,
    app: Arc<dyn Application>,
    any: Arc<dyn Any + Send + Sync>,
}

/// Saved state of everything a script can touch
struct OrgImage {
    ledger: StateImage,
    bank: StateImage,
    apps: Vec<(Address, StateImage)>,
}

/// A governed organization
pub struct Organization {
    address: Address,
    chain: Chain,
    acl: Arc<dyn CapabilityGraph>,
    ledger: Arc<dyn TokenLedger>,
    script_registry: Address,
    apps: RwLock<Vec<InstalledApp>>,
    this: Weak<Organization>,
}

impl Organization {
    pub(crate) fn new(
        address: Address,
        chain: Chain,
        acl: Arc<dyn CapabilityGraph>,
        ledger: Arc<dyn TokenLedger>,
        script_registry: Address,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            address,
            chain,
            acl,
            ledger,
            script_registry,
            apps: RwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Address of the organization
    pub fn address(&self) -> Address {
        self.address
    }

    /// The organization's capability graph
    pub fn acl(&self) -> &Arc<dyn CapabilityGraph> {
        &self.acl
    }

    /// The token ledger used by the organization's applications
    pub fn ledger(&self) -> &Arc<dyn TokenLedger> {
        &self.ledger
    }

    /// The chain the organization lives on
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Address of the script registry installed at creation
    pub fn script_registry(&self) -> Address {
        self.script_registry
    }

    /// Executor that runs scripts against this organization's applications
    pub fn executor(&self) -> Arc<dyn ActionExecutor> {
        Arc::new(OrgExecutor::new(self.this.clone()))
    }

    fn env(&self, address: Address) -> InstallEnv {
        InstallEnv {
            address,
            organization: self.address,
            acl: self.acl.clone(),
            ledger: self.ledger.clone(),
            bank: self.chain.bank().clone(),
            executor: self.executor(),
        }
    }

    /// Install a new application instance from a published package
    ///
    /// Requires `APP_MANAGER` on the organization.
    pub async fn install<A, F>(&self, ctx: &CallContext, package: &PackageVersion, build: F) -> KernelResult<Arc<A>>
    where
        A: Application + 'static,
        F: FnOnce(InstallEnv) -> A,
    {
        if !self.acl.has_permission(ctx.sender, self.address, roles::APP_MANAGER).await {
            return Err(KernelError::Unauthorized {
                sender: ctx.sender,
                organization: self.address,
                action: roles::APP_MANAGER.to_string(),
            });
        }

        let address = self.chain.allocate_address(&self.address);
        let app = Arc::new(build(self.env(address)));
        self.register(app.clone(), package.installation_id()).await;
        Ok(app)
    }

    /// Install an application at a fixed address without capability checks
    pub(crate) async fn install_system<A, F>(&self, address: Address, installation_id: Hash32, build: F) -> Arc<A>
    where
        A: Application + 'static,
        F: FnOnce(InstallEnv) -> A,
    {
        let app = Arc::new(build(self.env(address)));
        self.register(app.clone(), installation_id).await;
        app
    }

    async fn register<A: Application + 'static>(&self, app: Arc<A>, installation_id: Hash32) {
        let mut apps = self.apps.write().await;
        let ordinal = apps
            .iter()
            .filter(|a| a.instance.installation_id == installation_id)
            .count() as u32;
        let instance = AppInstance {
            kind: app.kind(),
            installation_id,
            ordinal,
            address: app.address(),
            organization: self.address,
        };
        info!(
            organization = %self.address,
            kind = %instance.kind,
            app = %instance.address,
            ordinal,
            "Application installed"
        );
        let any: Arc<dyn Any + Send + Sync> = app.clone();
        apps.push(InstalledApp { instance, app, any });
    }

    /// Install records, in installation order
    pub async fn apps(&self) -> Vec<AppInstance> {
        self.apps.read().await.iter().map(|a| a.instance.clone()).collect()
    }

    /// Install record of one application
    pub async fn instance(&self, address: Address) -> KernelResult<AppInstance> {
        self.apps
            .read()
            .await
            .iter()
            .find(|a| a.instance.address == address)
            .map(|a| a.instance.clone())
            .ok_or(KernelError::UnknownApp(address))
    }

    /// The application installed at `address`
    pub async fn app(&self, address: Address) -> Option<Arc<dyn Application>> {
        self.apps
            .read()
            .await
            .iter()
            .find(|a| a.instance.address == address)
            .map(|a| a.app.clone())
    }

    /// The application installed at `address` as its concrete type
    pub async fn app_as<A: Any + Send + Sync>(&self, address: Address) -> Option<Arc<A>> {
        let any = self
            .apps
            .read()
            .await
            .iter()
            .find(|a| a.instance.address == address)
            .map(|a| a.any.clone())?;
        any.downcast::<A>().ok()
    }

    /// Whether scripts with this spec id may run
    pub async fn is_spec_enabled(&self, spec_id: u32) -> bool {
        match self.app_as::<ScriptRegistry>(self.script_registry).await {
            Some(registry) => registry.is_enabled(spec_id).await,
            None => false,
        }
    }

    pub(crate) async fn save_state(&self) -> StateImage {
        let apps: Vec<Arc<dyn Application>> = self.apps.read().await.iter().map(|a| a.app.clone()).collect();
        let mut images = Vec::with_capacity(apps.len());
        for app in apps {
            images.push((app.address(), app.save_state().await));
        }
        Box::new(OrgImage {
            ledger: self.ledger.save_state().await,
            bank: self.chain.bank().save_state().await,
            apps: images,
        })
    }

    pub(crate) async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        let image = downcast_image::<OrgImage>(image, "organization")?;
        self.ledger.restore_state(image.ledger).await?;
        self.chain.bank().restore_state(image.bank).await?;
        for (address, app_image) in image.apps {
            if let Some(app) = self.app(address).await {
                app.restore_state(app_image).await?;
            }
        }
        debug!(organization = %self.address, "Organization state restored");
        Ok(())
    }
}

impl std::fmt::Debug for Organization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organization")
            .field("address", &self.address)
            .field("acl", &self.acl.root())
            .field("script_registry", &self.script_registry)
            .finish()
    }
}
