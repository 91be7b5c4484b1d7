//! Applications for orgkit organizations
//!
//! Each application is installed into an organization through
//! `Organization::install` and reached by other applications and scripts
//! through `Application::invoke`. Privileged calls are checked against the
//! organization's capability graph with the caller as subject.

use thiserror::Error;

use orgkit_core::{Address, BankError, CallError, ExecutionError};
use orgkit_kernel::InstallEnv;
use orgkit_ledger::LedgerError;

pub mod agent;
pub mod finance;
pub mod token_manager;
pub mod vault;

pub use agent::{Agent, AgentCall};
pub use finance::{Finance, FinanceCall, Payment, PeriodTotals};
pub use token_manager::{TokenManager, TokenManagerCall};
pub use vault::{Vault, VaultCall};

/// Error types for application calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The caller lacks the required capability
    #[error("Unauthorized: {sender} lacks {action}")]
    Unauthorized { sender: Address, action: String },

    /// Native asset error
    #[error("Bank error: {0}")]
    Bank(#[from] BankError),

    /// Token ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A nested call or script failed
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// No payment with this id
    #[error("Unknown payment: {0}")]
    UnknownPayment(u64),

    /// The payment is deactivated
    #[error("Payment {0} is inactive")]
    PaymentInactive(u64),

    /// No installment of the payment is due
    #[error("No installment of payment {0} is due")]
    NothingDue(u64),

    /// Payment parameters are invalid
    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    /// The caller holds none of the forwarding token
    #[error("{0} holds no tokens and cannot forward")]
    NotHolder(Address),
}

/// Result type for application calls
pub type AppResult<T> = Result<T, AppError>;

impl From<AppError> for CallError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Unauthorized { sender, action } => CallError::Unauthorized { sender, action },
            other => CallError::Reverted(other.to_string()),
        }
    }
}

/// Fail unless `sender` holds `action` on the application
pub(crate) async fn authorize(env: &InstallEnv, sender: Address, action: &str) -> AppResult<()> {
    if env.can_perform(sender, action).await {
        Ok(())
    } else {
        Err(AppError::Unauthorized {
            sender,
            action: action.to_string(),
        })
    }
}
