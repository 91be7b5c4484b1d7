//! Treasury vault

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use orgkit_acl::roles;
use orgkit_core::{
    decode_call, encode_return, Address, AppKind, Application, CallContext, CallError, RevertError, Revertible,
    StateImage,
};
use orgkit_kernel::InstallEnv;

use crate::{authorize, AppResult};

/// Calls accepted by a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VaultCall {
    /// Move funds from the caller into the vault
    Deposit { amount: u128 },
    /// Move funds out of the vault; requires `TRANSFER`
    Transfer { to: Address, amount: u128 },
    /// Current balance
    Balance,
}

/// Holds the organization's native assets
pub struct Vault {
    env: InstallEnv,
}

impl Vault {
    /// Create a vault
    pub fn new(env: InstallEnv) -> Self {
        Self { env }
    }

    /// Current balance
    pub async fn balance(&self) -> u128 {
        self.env.bank.balance_of(&self.env.address).await
    }

    /// Move `amount` from the caller into the vault
    pub async fn deposit(&self, ctx: &CallContext, amount: u128) -> AppResult<()> {
        self.env.bank.transfer(ctx.sender, self.env.address, amount).await?;
        info!(vault = %self.env.address, from = %ctx.sender, amount, "Vault deposit");
        Ok(())
    }

    /// Move `amount` out of the vault to `to`
    pub async fn transfer(&self, ctx: &CallContext, to: Address, amount: u128) -> AppResult<()> {
        authorize(&self.env, ctx.sender, roles::TRANSFER).await?;
        self.env.bank.transfer(self.env.address, to, amount).await?;
        info!(vault = %self.env.address, to = %to, amount, by = %ctx.sender, "Vault transfer");
        Ok(())
    }
}

#[async_trait]
impl Revertible for Vault {
    // balances live in the bank, which the executor saves on its own
    async fn save_state(&self) -> StateImage {
        Box::new(())
    }

    async fn restore_state(&self, _image: StateImage) -> Result<(), RevertError> {
        Ok(())
    }
}

#[async_trait]
impl Application for Vault {
    fn kind(&self) -> AppKind {
        AppKind::Vault
    }

    fn address(&self) -> Address {
        self.env.address
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            VaultCall::Deposit { amount } => encode_return(&self.deposit(ctx, amount).await?),
            VaultCall::Transfer { to, amount } => encode_return(&self.transfer(ctx, to, amount).await?),
            VaultCall::Balance => encode_return(&self.balance().await),
        }
    }
}
