//! Action scripts
//!
//! An action script is an ordered list of calls encoded as bytes:
//! a 4-byte big-endian spec id followed by repeated
//! `{20-byte target, 4-byte big-endian calldata length, calldata}` records.
//! Scripts are opaque to whoever stores them (a vote keeps the bytes) and
//! are only decoded by an executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{Address, ADDRESS_LEN};
use crate::app::CallError;
use crate::chain::CallContext;

/// Spec id of the plain call script format
pub const CALLS_SCRIPT_SPEC: u32 = 1;

/// Errors decoding a script
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Shorter than the 4-byte spec id
    #[error("Script is missing its spec id")]
    MissingSpecId,

    /// A record ended before its declared length
    #[error("Script truncated at byte {0}")]
    Truncated(usize),

    /// Calldata too large to encode
    #[error("Calldata of {0} bytes exceeds the encodable length")]
    CalldataTooLarge(usize),
}

/// Errors running a script
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The script bytes were malformed
    #[error("Malformed script: {0}")]
    Malformed(#[from] ScriptError),

    /// The script's spec id is not enabled for this executor
    #[error("Script spec {0} is not enabled")]
    SpecDisabled(u32),

    /// An action targeted an address the executor cannot reach
    #[error("Action {step} targets unknown application {target}")]
    UnknownTarget { step: usize, target: Address },

    /// An action failed; nothing from the script was kept
    #[error("Action {step} on {target} reverted: {source}")]
    Reverted {
        step: usize,
        target: Address,
        #[source]
        source: CallError,
    },

    /// The executor's host is gone
    #[error("Executor unavailable: {0}")]
    Unavailable(String),
}

/// One call in a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Application to call
    pub target: Address,
    /// Calldata passed to the application
    pub calldata: Vec<u8>,
}

impl Action {
    /// Create an action
    pub fn new(target: Address, calldata: Vec<u8>) -> Self {
        Self { target, calldata }
    }
}

/// Decoded form of a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionScript {
    /// Format identifier
    pub spec_id: u32,
    /// Calls in execution order
    pub actions: Vec<Action>,
}

impl ActionScript {
    /// Encoded script with no actions
    pub const EMPTY: [u8; 4] = CALLS_SCRIPT_SPEC.to_be_bytes();

    /// A call script over the given actions
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            spec_id: CALLS_SCRIPT_SPEC,
            actions,
        }
    }

    /// Encode to bytes
    pub fn encode(&self) -> Result<Vec<u8>, ScriptError> {
        let body: usize = self
            .actions
            .iter()
            .map(|a| ADDRESS_LEN + 4 + a.calldata.len())
            .sum();
        let mut out = Vec::with_capacity(4 + body);
        out.extend_from_slice(&self.spec_id.to_be_bytes());
        for action in &self.actions {
            let len = u32::try_from(action.calldata.len())
                .map_err(|_| ScriptError::CalldataTooLarge(action.calldata.len()))?;
            out.extend_from_slice(action.target.as_bytes());
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&action.calldata);
        }
        Ok(out)
    }

    /// Decode from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ScriptError> {
        let spec_id = read_u32(bytes, 0).ok_or(ScriptError::MissingSpecId)?;
        let mut actions = Vec::new();
        let mut pos = 4;
        while pos < bytes.len() {
            let target_end = pos + ADDRESS_LEN;
            let target_bytes = bytes.get(pos..target_end).ok_or(ScriptError::Truncated(pos))?;
            let mut raw = [0u8; ADDRESS_LEN];
            raw.copy_from_slice(target_bytes);

            let len = read_u32(bytes, target_end).ok_or(ScriptError::Truncated(target_end))? as usize;
            let data_start = target_end + 4;
            let calldata = bytes
                .get(data_start..data_start + len)
                .ok_or(ScriptError::Truncated(data_start))?;

            actions.push(Action::new(Address::new(raw), calldata.to_vec()));
            pos = data_start + len;
        }
        Ok(Self { spec_id, actions })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let slice = bytes.get(at..at + 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Some(u32::from_be_bytes(buf))
}

/// Runs action scripts with all-or-nothing semantics
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run every action in order with `ctx.sender` as the caller.
    ///
    /// Returns each action's return data. If any action fails, every effect
    /// of the script is undone and `ExecutionError::Reverted` is returned.
    async fn run(&self, ctx: &CallContext, script: &[u8]) -> Result<Vec<Vec<u8>>, ExecutionError>;
}
