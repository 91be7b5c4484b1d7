//! Token ledger for orgkit
//!
//! Tracks weighted token balances for voting cohorts. Every balance and
//! every total supply keeps a per-block history so that voting power can
//! be read as of a past block. Tokens only grow through `mint`, which is
//! restricted to the token's controller.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use orgkit_core::{
    downcast_image, Address, BlockNumber, CallContext, RevertError, Revertible, StateImage,
};

pub mod checkpoint;

pub use checkpoint::{Checkpoint, Checkpoints};

/// Error types for ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No token at this address
    #[error("Unknown token: {0}")]
    UnknownToken(Address),

    /// Only the token's controller may mint or reassign control
    #[error("{sender} is not the controller of token {token}")]
    NotController { sender: Address, token: Address },

    /// Minting would overflow a balance or the supply
    #[error("Mint overflows token {0}")]
    Overflow(Address),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Token metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Address of the token
    pub address: Address,
    /// Human readable name
    pub name: String,
    /// Ticker symbol
    pub symbol: String,
    /// Principal allowed to mint
    pub controller: Address,
    /// Block the token was created in
    pub created_at_block: BlockNumber,
}

/// The token ledger interface consumed by token managers and voting engines
#[async_trait]
pub trait TokenLedger: Revertible {
    /// Create a token controlled by `controller`
    async fn create_token(
        &self,
        ctx: &CallContext,
        controller: Address,
        name: &str,
        symbol: &str,
    ) -> LedgerResult<Address>;

    /// Hand control of a token to someone else; controller only
    async fn change_controller(
        &self,
        ctx: &CallContext,
        token: Address,
        new_controller: Address,
    ) -> LedgerResult<()>;

    /// Mint `amount` to `holder`; controller only
    async fn mint(
        &self,
        ctx: &CallContext,
        token: Address,
        holder: Address,
        amount: u128,
    ) -> LedgerResult<()>;

    /// Token metadata
    async fn token(&self, token: Address) -> LedgerResult<TokenInfo>;

    /// Current balance
    async fn balance_of(&self, token: Address, holder: Address) -> LedgerResult<u128>;

    /// Balance as of the end of `block`
    async fn balance_at(&self, token: Address, holder: Address, block: BlockNumber) -> LedgerResult<u128>;

    /// Current total supply
    async fn total_supply(&self, token: Address) -> LedgerResult<u128>;

    /// Total supply as of the end of `block`
    async fn total_supply_at(&self, token: Address, block: BlockNumber) -> LedgerResult<u128>;
}

#[derive(Debug, Clone)]
struct TokenState {
    info: TokenInfo,
    supply: Checkpoints,
    balances: HashMap<Address, Checkpoints>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    tokens: HashMap<Address, TokenState>,
    nonce: u64,
}

/// In-memory checkpointed ledger
#[derive(Debug)]
pub struct CheckpointLedger {
    /// Address new tokens are derived from
    address: Address,
    state: RwLock<LedgerState>,
}

impl CheckpointLedger {
    /// Create an empty ledger
    pub fn new(address: Address) -> Self {
        Self {
            address,
            state: RwLock::new(LedgerState::default()),
        }
    }

    fn token_state<'a>(state: &'a LedgerState, token: &Address) -> LedgerResult<&'a TokenState> {
        state.tokens.get(token).ok_or(LedgerError::UnknownToken(*token))
    }

    fn controlled_token<'a>(
        state: &'a mut LedgerState,
        sender: Address,
        token: Address,
    ) -> LedgerResult<&'a mut TokenState> {
        let entry = state.tokens.get_mut(&token).ok_or(LedgerError::UnknownToken(token))?;
        if entry.info.controller != sender {
            return Err(LedgerError::NotController { sender, token });
        }
        Ok(entry)
    }
}

#[async_trait]
impl TokenLedger for CheckpointLedger {
    async fn create_token(
        &self,
        ctx: &CallContext,
        controller: Address,
        name: &str,
        symbol: &str,
    ) -> LedgerResult<Address> {
        let mut state = self.state.write().await;
        state.nonce += 1;
        let address = Address::derive(&self.address, state.nonce);
        let info = TokenInfo {
            address,
            name: name.to_string(),
            symbol: symbol.to_string(),
            controller,
            created_at_block: ctx.block_number,
        };
        state.tokens.insert(
            address,
            TokenState {
                info,
                supply: Checkpoints::default(),
                balances: HashMap::new(),
            },
        );
        info!(token = %address, symbol, controller = %controller, "Token created");
        Ok(address)
    }

    async fn change_controller(
        &self,
        ctx: &CallContext,
        token: Address,
        new_controller: Address,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let entry = Self::controlled_token(&mut state, ctx.sender, token)?;
        entry.info.controller = new_controller;
        debug!(token = %token, controller = %new_controller, "Token controller changed");
        Ok(())
    }

    async fn mint(
        &self,
        ctx: &CallContext,
        token: Address,
        holder: Address,
        amount: u128,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let entry = Self::controlled_token(&mut state, ctx.sender, token)?;

        let supply = entry
            .supply
            .latest()
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(token))?;
        let balances = entry.balances.entry(holder).or_default();
        let balance = balances.latest().checked_add(amount).ok_or(LedgerError::Overflow(token))?;

        balances.record(ctx.block_number, balance);
        entry.supply.record(ctx.block_number, supply);
        debug!(token = %token, holder = %holder, amount, block = ctx.block_number, "Tokens minted");
        Ok(())
    }

    async fn token(&self, token: Address) -> LedgerResult<TokenInfo> {
        let state = self.state.read().await;
        Ok(Self::token_state(&state, &token)?.info.clone())
    }

    async fn balance_of(&self, token: Address, holder: Address) -> LedgerResult<u128> {
        let state = self.state.read().await;
        let entry = Self::token_state(&state, &token)?;
        Ok(entry.balances.get(&holder).map(|c| c.latest()).unwrap_or(0))
    }

    async fn balance_at(&self, token: Address, holder: Address, block: BlockNumber) -> LedgerResult<u128> {
        let state = self.state.read().await;
        let entry = Self::token_state(&state, &token)?;
        Ok(entry.balances.get(&holder).map(|c| c.value_at(block)).unwrap_or(0))
    }

    async fn total_supply(&self, token: Address) -> LedgerResult<u128> {
        let state = self.state.read().await;
        Ok(Self::token_state(&state, &token)?.supply.latest())
    }

    async fn total_supply_at(&self, token: Address, block: BlockNumber) -> LedgerResult<u128> {
        let state = self.state.read().await;
        Ok(Self::token_state(&state, &token)?.supply.value_at(block))
    }
}

#[async_trait]
impl Revertible for CheckpointLedger {
    async fn save_state(&self) -> StateImage {
        Box::new(self.state.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        let state = downcast_image::<LedgerState>(image, "ledger")?;
        *self.state.write().await = state;
        Ok(())
    }
}
