//! Token manager
//!
//! Controller of a single token. Minting is capability gated; any current
//! holder may forward a script, which then runs with the token manager as
//! the sender. Voting engines grant `CREATE_VOTES` to a token manager, so
//! forwarding is how holders open votes.

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

use crate::{authorize, AppError, AppResult};

/// Calls accepted by a token manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TokenManagerCall {
    /// Mint new tokens; requires `MINT`
    Mint { receiver: Address, amount: u128 },
    /// Run a script as the token manager; caller must hold tokens
    Forward {
        #[serde(with = "hex_bytes")]
        script: Vec<u8>,
    },
}

/// Controller of one token
pub struct TokenManager {
    env: InstallEnv,
    token: Address,
}

impl TokenManager {
    /// Create a token manager for `token`
    ///
    /// Control of the token must be handed to the manager's address
    /// before it can mint.
    pub fn new(env: InstallEnv, token: Address) -> Self {
        Self { env, token }
    }

    /// The managed token
    pub fn token(&self) -> Address {
        self.token
    }

    /// Mint `amount` to `receiver`
    pub async fn mint(&self, ctx: &CallContext, receiver: Address, amount: u128) -> AppResult<()> {
        authorize(&self.env, ctx.sender, roles::MINT).await?;
        self.env
            .ledger
            .mint(&ctx.with_sender(self.env.address), self.token, receiver, amount)
            .await?;
        info!(token_manager = %self.env.address, receiver = %receiver, amount, "Tokens minted");
        Ok(())
    }

    /// Whether `sender` may forward scripts
    pub async fn can_forward(&self, sender: Address) -> bool {
        matches!(self.env.ledger.balance_of(self.token, sender).await, Ok(balance) if balance > 0)
    }

    /// Run `script` with the token manager as sender
    pub async fn forward(&self, ctx: &CallContext, script: &[u8]) -> AppResult<Vec<Vec<u8>>> {
        if !self.can_forward(ctx.sender).await {
            return Err(AppError::NotHolder(ctx.sender));
        }
        info!(token_manager = %self.env.address, holder = %ctx.sender, "Forwarding script");
        Ok(self.env.executor.run(&ctx.with_sender(self.env.address), script).await?)
    }
}

#[async_trait]
impl Revertible for TokenManager {
    // balances live in the ledger, which the executor saves on its own
    async fn save_state(&self) -> StateImage {
        Box::new(())
    }

    async fn restore_state(&self, _image: StateImage) -> Result<(), RevertError> {
        Ok(())
    }
}

#[async_trait]
impl Application for TokenManager {
    fn kind(&self) -> AppKind {
        AppKind::TokenManager
    }

    fn address(&self) -> Address {
        self.env.address
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            TokenManagerCall::Mint { receiver, amount } => encode_return(&self.mint(ctx, receiver, amount).await?),
            TokenManagerCall::Forward { script } => encode_return(&self.forward(ctx, &script).await?),
        }
    }
}
