//! Script executor registry
//!
//! Lists the script spec ids an organization accepts. Spec id 1 (plain
//! call scripts) is enabled at creation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use orgkit_acl::{roles, CapabilityGraph};
use orgkit_core::{
    decode_call, downcast_image, encode_return, Address, AppKind, Application, CallContext, CallError,
    RevertError, Revertible, StateImage, CALLS_SCRIPT_SPEC,
};

use crate::InstallEnv;

/// Calls accepted by the script registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ScriptRegistryCall {
    /// Register a new spec id; requires `ADD_EXECUTOR`
    AddExecutor { spec_id: u32 },
    /// Re-enable a registered spec id; requires `REGISTRY_MANAGER`
    EnableExecutor { spec_id: u32 },
    /// Disable a spec id; requires `REGISTRY_MANAGER`
    DisableExecutor { spec_id: u32 },
    /// Whether a spec id is enabled
    IsEnabled { spec_id: u32 },
}

/// Registry of enabled script formats
pub struct ScriptRegistry {
    address: Address,
    acl: Arc<dyn CapabilityGraph>,
    executors: RwLock<BTreeMap<u32, bool>>,
}

impl ScriptRegistry {
    pub(crate) fn new(env: InstallEnv) -> Self {
        Self {
            address: env.address,
            acl: env.acl,
            executors: RwLock::new(BTreeMap::from([(CALLS_SCRIPT_SPEC, true)])),
        }
    }

    async fn authorize(&self, sender: Address, action: &str) -> Result<(), CallError> {
        if self.acl.has_permission(sender, self.address, action).await {
            Ok(())
        } else {
            Err(CallError::Unauthorized {
                sender,
                action: action.to_string(),
            })
        }
    }

    /// Whether scripts with this spec id may run
    pub async fn is_enabled(&self, spec_id: u32) -> bool {
        self.executors.read().await.get(&spec_id).copied().unwrap_or(false)
    }

    /// Register and enable a spec id
    pub async fn add_executor(&self, ctx: &CallContext, spec_id: u32) -> Result<(), CallError> {
        self.authorize(ctx.sender, roles::ADD_EXECUTOR).await?;
        let mut executors = self.executors.write().await;
        if executors.contains_key(&spec_id) {
            return Err(CallError::Reverted(format!("executor {} already registered", spec_id)));
        }
        executors.insert(spec_id, true);
        info!(registry = %self.address, spec_id, "Script executor added");
        Ok(())
    }

    /// Enable or disable a registered spec id
    pub async fn set_enabled(&self, ctx: &CallContext, spec_id: u32, enabled: bool) -> Result<(), CallError> {
        self.authorize(ctx.sender, roles::REGISTRY_MANAGER).await?;
        let mut executors = self.executors.write().await;
        let entry = executors
            .get_mut(&spec_id)
            .ok_or_else(|| CallError::Reverted(format!("executor {} not registered", spec_id)))?;
        *entry = enabled;
        info!(registry = %self.address, spec_id, enabled, "Script executor toggled");
        Ok(())
    }
}

#[async_trait]
impl Revertible for ScriptRegistry {
    async fn save_state(&self) -> StateImage {
        Box::new(self.executors.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        *self.executors.write().await = downcast_image(image, "script registry")?;
        Ok(())
    }
}

#[async_trait]
impl Application for ScriptRegistry {
    fn kind(&self) -> AppKind {
        AppKind::ScriptRegistry
    }

    fn address(&self) -> Address {
        self.address
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            ScriptRegistryCall::AddExecutor { spec_id } => encode_return(&self.add_executor(ctx, spec_id).await?),
            ScriptRegistryCall::EnableExecutor { spec_id } => {
                encode_return(&self.set_enabled(ctx, spec_id, true).await?)
            }
            ScriptRegistryCall::DisableExecutor { spec_id } => {
                encode_return(&self.set_enabled(ctx, spec_id, false).await?)
            }
            ScriptRegistryCall::IsEnabled { spec_id } => encode_return(&self.is_enabled(spec_id).await),
        }
    }
}
