//! Core orgkit module
//!
//! Fundamental components shared by every orgkit crate: principal addresses,
//! the chain context calls execute in, fixed-point fractions, the
//! application and action-script contracts, and key-value storage.

pub mod address;
pub mod app;
pub mod bank;
pub mod chain;
pub mod hash;
pub mod pct;
pub mod revert;
pub mod script;
pub mod storage;
pub mod utils;

// Re-export key components
pub use address::{Address, AddressError};
pub use app::{decode_call, decode_return, encode_call, encode_return, AppKind, Application, CallError};
pub use bank::{Bank, BankError, BankResult};
pub use chain::{BlockClock, BlockNumber, CallContext, Chain, Timestamp, Transaction};
pub use hash::{namehash, sha256, Hash32};
pub use pct::{Pct, PCT_BASE};
pub use revert::{downcast_image, RevertError, Revertible, StateImage};
pub use script::{Action, ActionExecutor, ActionScript, ExecutionError, ScriptError, CALLS_SCRIPT_SPEC};
pub use storage::{MemoryStorage, Storage, StorageError, StorageResult};
pub use utils::{timestamp_secs, tokens, TOKEN_UNIT};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for orgkit
///
/// Honors `RUST_LOG`; falls back to `default_level` when it is unset.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    // A subscriber may already be installed (tests, embedding binaries)
    let _ = tracing::subscriber::set_global_default(subscriber);
}
