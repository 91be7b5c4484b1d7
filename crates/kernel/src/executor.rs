//! Organization-scoped script execution

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use orgkit_core::{ActionExecutor, ActionScript, Application, CallContext, ExecutionError};

use crate::organization::Organization;

/// Runs scripts against the applications of one organization
///
/// Every application of the organization, the token ledger and the bank
/// are saved before the first action and restored if any action fails.
#[derive(Debug, Clone)]
pub struct OrgExecutor {
    org: Weak<Organization>,
}

impl OrgExecutor {
    pub(crate) fn new(org: Weak<Organization>) -> Self {
        Self { org }
    }
}

#[async_trait]
impl ActionExecutor for OrgExecutor {
    async fn run(&self, ctx: &CallContext, script: &[u8]) -> Result<Vec<Vec<u8>>, ExecutionError> {
        let org = self
            .org
            .upgrade()
            .ok_or_else(|| ExecutionError::Unavailable("organization dropped".to_string()))?;

        let script = ActionScript::decode(script)?;
        if !org.is_spec_enabled(script.spec_id).await {
            return Err(ExecutionError::SpecDisabled(script.spec_id));
        }

        let mut targets: Vec<Arc<dyn Application>> = Vec::with_capacity(script.actions.len());
        for (step, action) in script.actions.iter().enumerate() {
            let app = org.app(action.target).await.ok_or(ExecutionError::UnknownTarget {
                step,
                target: action.target,
            })?;
            targets.push(app);
        }

        let image = org.save_state().await;
        let mut outputs = Vec::with_capacity(targets.len());
        for (step, (action, app)) in script.actions.iter().zip(targets).enumerate() {
            match app.invoke(ctx, &action.calldata).await {
                Ok(output) => outputs.push(output),
                Err(source) => {
                    warn!(
                        organization = %org.address(),
                        step,
                        target = %action.target,
                        error = %source,
                        "Script action failed, reverting"
                    );
                    if let Err(e) = org.restore_state(image).await {
                        error!(organization = %org.address(), error = %e, "Failed to restore organization state");
                    }
                    return Err(ExecutionError::Reverted {
                        step,
                        target: action.target,
                        source,
                    });
                }
            }
        }

        debug!(
            organization = %org.address(),
            sender = %ctx.sender,
            actions = outputs.len(),
            "Script executed"
        );
        Ok(outputs)
    }
}
