//! Named capabilities used across orgkit applications

/// Create new permissions anywhere in the organization (held on the graph root)
pub const CREATE_PERMISSIONS: &str = "CREATE_PERMISSIONS";
/// Install applications into the organization
pub const APP_MANAGER: &str = "APP_MANAGER";

/// Move funds out of a vault
pub const TRANSFER: &str = "TRANSFER";

/// Schedule payments from finance
pub const CREATE_PAYMENTS: &str = "CREATE_PAYMENTS";
/// Execute due scheduled payments
pub const EXECUTE_PAYMENTS: &str = "EXECUTE_PAYMENTS";
/// Activate or deactivate payments
pub const MANAGE_PAYMENTS: &str = "MANAGE_PAYMENTS";

/// Mint tokens through a token manager
pub const MINT: &str = "MINT";

/// Open votes on a voting engine
pub const CREATE_VOTES: &str = "CREATE_VOTES";
/// Change a voting engine's minimum acceptance quorum
pub const MODIFY_QUORUM: &str = "MODIFY_QUORUM";
/// Change a voting engine's required support
pub const MODIFY_SUPPORT: &str = "MODIFY_SUPPORT";

/// Execute a single call through an agent
pub const EXECUTE: &str = "EXECUTE";
/// Run a script through an agent
pub const RUN_SCRIPT: &str = "RUN_SCRIPT";

/// Enable script executors in the script registry
pub const ADD_EXECUTOR: &str = "ADD_EXECUTOR";
/// Enable or disable script executors
pub const REGISTRY_MANAGER: &str = "REGISTRY_MANAGER";
