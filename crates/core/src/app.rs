//! Installable applications
//!
//! An application is an independently addressed module installed into an
//! organization. Other applications and action scripts reach it only
//! through `invoke`, with calldata that is a JSON-encoded call of the
//! application's own call type.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;
use crate::chain::CallContext;
use crate::revert::Revertible;

/// Kinds of application an organization can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    /// Holds the organization's funds
    Vault,
    /// Disburses treasury funds through payments
    Finance,
    /// Controls one membership token
    TokenManager,
    /// Token-weighted voting engine
    Voting,
    /// Executes arbitrary calls on behalf of the organization
    Agent,
    /// Lists enabled script executors; installed with every organization
    ScriptRegistry,
    /// Call gateway to the organization's capability graph
    Acl,
}

impl AppKind {
    /// Kinds that must be resolvable in the package registry before provisioning
    pub const REQUIRED: [AppKind; 5] = [
        AppKind::Agent,
        AppKind::Finance,
        AppKind::TokenManager,
        AppKind::Vault,
        AppKind::Voting,
    ];

    /// Package label of this kind
    pub fn label(&self) -> &'static str {
        match self {
            AppKind::Vault => "vault",
            AppKind::Finance => "finance",
            AppKind::TokenManager => "token-manager",
            AppKind::Voting => "voting",
            AppKind::Agent => "agent",
            AppKind::ScriptRegistry => "script-registry",
            AppKind::Acl => "acl",
        }
    }

    /// Full package name under a registry domain, e.g. `voting.orgkit.pkg`
    pub fn package_name(&self, registry_domain: &str) -> String {
        format!("{}.{}", self.label(), registry_domain)
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure of a call into an application
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The caller lacks the capability the call requires
    #[error("Unauthorized: {sender} lacks {action}")]
    Unauthorized { sender: Address, action: String },

    /// Calldata did not decode to a call of the target application
    #[error("Invalid calldata: {0}")]
    InvalidCalldata(String),

    /// The call was understood but failed
    #[error("Call reverted: {0}")]
    Reverted(String),
}

/// An application instance reachable through calldata
#[async_trait]
pub trait Application: Revertible {
    /// The application's kind
    fn kind(&self) -> AppKind;

    /// The application's proxy address
    fn address(&self) -> Address;

    /// Handle a call; returns JSON-encoded return data
    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError>;
}

/// Encode a call for an application
pub fn encode_call<T: Serialize>(call: &T) -> Result<Vec<u8>, CallError> {
    serde_json::to_vec(call).map_err(|e| CallError::InvalidCalldata(e.to_string()))
}

/// Decode calldata into an application's call type
pub fn decode_call<T: DeserializeOwned>(calldata: &[u8]) -> Result<T, CallError> {
    serde_json::from_slice(calldata).map_err(|e| CallError::InvalidCalldata(e.to_string()))
}

/// Encode a return value
pub fn encode_return<T: Serialize>(value: &T) -> Result<Vec<u8>, CallError> {
    serde_json::to_vec(value).map_err(|e| CallError::Reverted(format!("unencodable return: {}", e)))
}

/// Decode return data produced by `encode_return`
pub fn decode_return<T: DeserializeOwned>(data: &[u8]) -> Result<T, CallError> {
    serde_json::from_slice(data).map_err(|e| CallError::InvalidCalldata(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "method", rename_all = "snake_case")]
    enum PingCall {
        Ping { value: u64 },
    }

    #[test]
    fn test_package_names() {
        assert_eq!(AppKind::TokenManager.package_name("orgkit.pkg"), "token-manager.orgkit.pkg");
        assert_eq!(AppKind::Voting.to_string(), "voting");
    }

    #[test]
    fn test_calldata_codec() {
        let data = encode_call(&PingCall::Ping { value: 7 }).unwrap();
        let back: PingCall = decode_call(&data).unwrap();
        assert_eq!(back, PingCall::Ping { value: 7 });
        assert!(decode_call::<PingCall>(b"garbage").is_err());
    }
}
