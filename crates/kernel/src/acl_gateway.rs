//! Capability graph as a script target
//!
//! Lets whoever holds `CREATE_PERMISSIONS` or manages a permission change
//! the graph from an action script, with the script's sender as the
//! acting principal.

use std::sync::Arc;

use async_trait::async_trait;

use orgkit_acl::{AclCall, AclError, CapabilityGraph};
use orgkit_core::{
    decode_call, encode_return, Address, AppKind, Application, CallContext, CallError, RevertError, Revertible,
    StateImage,
};

/// Application wrapper around a capability graph
pub struct AclGateway {
    graph: Arc<dyn CapabilityGraph>,
}

impl AclGateway {
    pub(crate) fn new(graph: Arc<dyn CapabilityGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Revertible for AclGateway {
    async fn save_state(&self) -> StateImage {
        self.graph.save_state().await
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        self.graph.restore_state(image).await
    }
}

#[async_trait]
impl Application for AclGateway {
    fn kind(&self) -> AppKind {
        AppKind::Acl
    }

    fn address(&self) -> Address {
        self.graph.root()
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        let call: AclCall = decode_call(calldata)?;
        match self.graph.apply(ctx.sender, call).await {
            Ok(()) => encode_return(&()),
            Err(AclError::Unauthorized { sender, action, .. }) => Err(CallError::Unauthorized { sender, action }),
            Err(e) => Err(CallError::Reverted(e.to_string())),
        }
    }
}
