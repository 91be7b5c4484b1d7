//! Agent: acts on behalf of whoever governs it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use orgkit_acl::roles;
use orgkit_core::utils::hex_bytes;
use orgkit_core::{
    decode_call, encode_return, Address, AppKind, Application, CallContext, CallError, RevertError, Revertible,
    StateImage,
};
use orgkit_kernel::InstallEnv;

use crate::{authorize, AppResult};

/// Calls accepted by an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AgentCall {
    /// Call one application as the agent; requires `EXECUTE`
    Execute {
        target: Address,
        #[serde(with = "hex_bytes")]
        calldata: Vec<u8>,
    },
    /// Run a script as the agent; requires `RUN_SCRIPT`
    Forward {
        #[serde(with = "hex_bytes")]
        script: Vec<u8>,
    },
}

/// Executes calls on behalf of its governing engine
pub struct Agent {
    env: InstallEnv,
}

impl Agent {
    /// Create an agent
    pub fn new(env: InstallEnv) -> Self {
        Self { env }
    }

    /// Call `target` with the agent as sender; returns the call's return data
    pub async fn execute(&self, ctx: &CallContext, target: Address, calldata: Vec<u8>) -> AppResult<Vec<u8>> {
        authorize(&self.env, ctx.sender, roles::EXECUTE).await?;
        info!(agent = %self.env.address, target = %target, by = %ctx.sender, "Agent execute");
        Ok(self.env.call(ctx, target, calldata).await?)
    }

    /// Whether `sender` may forward scripts
    pub async fn can_forward(&self, sender: Address) -> bool {
        self.env.can_perform(sender, roles::RUN_SCRIPT).await
    }

    /// Run `script` with the agent as sender
    pub async fn forward(&self, ctx: &CallContext, script: &[u8]) -> AppResult<Vec<Vec<u8>>> {
        authorize(&self.env, ctx.sender, roles::RUN_SCRIPT).await?;
        info!(agent = %self.env.address, by = %ctx.sender, "Agent forwarding script");
        Ok(self.env.executor.run(&ctx.with_sender(self.env.address), script).await?)
    }
}

#[async_trait]
impl Revertible for Agent {
    async fn save_state(&self) -> StateImage {
        Box::new(())
    }

    async fn restore_state(&self, _image: StateImage) -> Result<(), RevertError> {
        Ok(())
    }
}

#[async_trait]
impl Application for Agent {
    fn kind(&self) -> AppKind {
        AppKind::Agent
    }

    fn address(&self) -> Address {
        self.env.address
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            AgentCall::Execute { target, calldata } => encode_return(&self.execute(ctx, target, calldata).await?),
            AgentCall::Forward { script } => encode_return(&self.forward(ctx, &script).await?),
        }
    }
}
