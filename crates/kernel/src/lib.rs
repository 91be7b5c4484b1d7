//! Organization kernel for orgkit
//!
//! An organization is a container of installed applications. Each
//! application lives behind its own proxy address; the organization keeps
//! the install records, owns the capability graph the applications consult,
//! and runs action scripts against its applications with all-or-nothing
//! semantics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use orgkit_acl::{AclError, CapabilityGraph};
use orgkit_core::{
    Action, ActionExecutor, ActionScript, Address, AppKind, Bank, CallContext, ExecutionError, Hash32,
};
use orgkit_ledger::TokenLedger;

pub mod acl_gateway;
pub mod executor;
pub mod factory;
pub mod organization;
pub mod script_registry;

pub use acl_gateway::AclGateway;
pub use executor::OrgExecutor;
pub use factory::OrganizationFactory;
pub use organization::Organization;
pub use script_registry::{ScriptRegistry, ScriptRegistryCall};

/// Error types for kernel operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The sender lacks a capability on the organization
    #[error("Unauthorized: {sender} lacks {action} on {organization}")]
    Unauthorized {
        sender: Address,
        organization: Address,
        action: String,
    },

    /// Capability graph error
    #[error("Capability graph error: {0}")]
    Acl(#[from] AclError),

    /// No application at this address in the organization
    #[error("Unknown application: {0}")]
    UnknownApp(Address),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Install record of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstance {
    /// Kind of application
    pub kind: AppKind,
    /// `sha256(app_id || version)` of the installed package
    pub installation_id: Hash32,
    /// Position among instances sharing the installation id
    pub ordinal: u32,
    /// Proxy address other code reaches the application through
    pub address: Address,
    /// Organization the application belongs to
    pub organization: Address,
}

/// What an application receives when it is installed
#[derive(Clone)]
pub struct InstallEnv {
    /// The application's own proxy address
    pub address: Address,
    /// The hosting organization
    pub organization: Address,
    /// The organization's capability graph
    pub acl: Arc<dyn CapabilityGraph>,
    /// The token ledger
    pub ledger: Arc<dyn TokenLedger>,
    /// The native asset bank
    pub bank: Arc<Bank>,
    /// The organization's script executor
    pub executor: Arc<dyn ActionExecutor>,
}

impl InstallEnv {
    /// Call another application of the organization as this application
    pub async fn call(&self, ctx: &CallContext, target: Address, calldata: Vec<u8>) -> Result<Vec<u8>, ExecutionError> {
        let script = ActionScript::new(vec![Action::new(target, calldata)]).encode()?;
        let mut outputs = self.executor.run(&ctx.with_sender(self.address), &script).await?;
        Ok(outputs.pop().unwrap_or_default())
    }

    /// Whether `who` holds `action` on this application
    pub async fn can_perform(&self, who: Address, action: &str) -> bool {
        self.acl.has_permission(who, self.address, action).await
    }
}
