//! Native asset balances
//!
//! Plain balance book for the chain's native asset. Vault and finance
//! applications move funds through it; holders are funded at genesis.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::address::Address;
use crate::revert::{downcast_image, RevertError, Revertible, StateImage};

/// Errors for native asset operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    /// Not enough funds to debit
    #[error("Insufficient funds in {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: u128,
        available: u128,
    },

    /// Crediting would overflow the balance
    #[error("Balance overflow for {0}")]
    Overflow(Address),
}

/// Result type for bank operations
pub type BankResult<T> = Result<T, BankError>;

/// Native asset balance book
#[derive(Debug, Default)]
pub struct Bank {
    balances: RwLock<HashMap<Address, u128>>,
}

impl Bank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of an account
    pub async fn balance_of(&self, account: &Address) -> u128 {
        self.balances.read().await.get(account).copied().unwrap_or(0)
    }

    /// Add funds to an account
    pub async fn credit(&self, account: Address, amount: u128) -> BankResult<()> {
        let mut balances = self.balances.write().await;
        let entry = balances.entry(account).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(BankError::Overflow(account))?;
        Ok(())
    }

    /// Remove funds from an account
    pub async fn debit(&self, account: Address, amount: u128) -> BankResult<()> {
        let mut balances = self.balances.write().await;
        let available = balances.get(&account).copied().unwrap_or(0);
        if available < amount {
            return Err(BankError::InsufficientFunds {
                account,
                needed: amount,
                available,
            });
        }
        balances.insert(account, available - amount);
        Ok(())
    }

    /// Move funds between accounts
    pub async fn transfer(&self, from: Address, to: Address, amount: u128) -> BankResult<()> {
        let mut balances = self.balances.write().await;
        let available = balances.get(&from).copied().unwrap_or(0);
        if available < amount {
            return Err(BankError::InsufficientFunds {
                account: from,
                needed: amount,
                available,
            });
        }
        let target = balances.get(&to).copied().unwrap_or(0);
        let credited = target.checked_add(amount).ok_or(BankError::Overflow(to))?;
        balances.insert(from, available - amount);
        balances.insert(to, credited);
        debug!(from = %from, to = %to, amount, "native transfer");
        Ok(())
    }
}

#[async_trait]
impl Revertible for Bank {
    async fn save_state(&self) -> StateImage {
        Box::new(self.balances.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        let balances = downcast_image::<HashMap<Address, u128>>(image, "bank")?;
        *self.balances.write().await = balances;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let bank = Bank::new();
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");

        bank.credit(alice, 100).await.unwrap();
        bank.transfer(alice, bob, 40).await.unwrap();

        assert_eq!(bank.balance_of(&alice).await, 60);
        assert_eq!(bank.balance_of(&bob).await, 40);
    }

    #[tokio::test]
    async fn test_overdraft_is_rejected() {
        let bank = Bank::new();
        let alice = Address::from_label("alice");
        let err = bank.debit(alice, 1).await.unwrap_err();
        assert!(matches!(err, BankError::InsufficientFunds { available: 0, .. }));
    }

    #[tokio::test]
    async fn test_restore_state() {
        let bank = Bank::new();
        let alice = Address::from_label("alice");
        bank.credit(alice, 10).await.unwrap();

        let image = bank.save_state().await;
        bank.credit(alice, 5).await.unwrap();
        bank.restore_state(image).await.unwrap();

        assert_eq!(bank.balance_of(&alice).await, 10);
    }
}
