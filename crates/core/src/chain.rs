//! Chain context
//!
//! The chain serializes every externally submitted call into its own
//! transaction. Beginning a transaction takes the single-writer lock and
//! produces a new block stamped with the current clock time, so state
//! written by one transaction is always visible at a strictly later block
//! to the next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::address::Address;
use crate::bank::Bank;
use crate::utils::timestamp_secs;

/// Block height
pub type BlockNumber = u64;

/// Seconds since the unix epoch
pub type Timestamp = u64;

/// Block production clock with adjustable time
#[derive(Debug)]
pub struct BlockClock {
    /// Height of the most recently produced block
    block: AtomicU64,
    /// Wall-clock time at genesis
    genesis_time: Timestamp,
    /// Seconds added on top of wall-clock progress
    offset: AtomicU64,
    /// Freeze time at genesis + offset instead of following the wall clock
    frozen: bool,
}

impl BlockClock {
    /// A clock that follows wall-clock time
    pub fn system() -> Self {
        Self {
            block: AtomicU64::new(0),
            genesis_time: timestamp_secs(),
            offset: AtomicU64::new(0),
            frozen: false,
        }
    }

    /// A clock that only moves when `advance` is called
    pub fn manual(genesis_time: Timestamp) -> Self {
        Self {
            block: AtomicU64::new(0),
            genesis_time,
            offset: AtomicU64::new(0),
            frozen: true,
        }
    }

    /// Current block height
    pub fn block_number(&self) -> BlockNumber {
        self.block.load(Ordering::SeqCst)
    }

    /// Current time
    pub fn now(&self) -> Timestamp {
        let base = if self.frozen {
            self.genesis_time
        } else {
            timestamp_secs().max(self.genesis_time)
        };
        base + self.offset.load(Ordering::SeqCst)
    }

    /// Move time forward
    pub fn advance(&self, seconds: u64) {
        self.offset.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Produce a new block and return its height
    fn mine(&self) -> BlockNumber {
        self.block.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Execution context of a call: who is calling, in which block, at what time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// The immediate caller
    pub sender: Address,
    /// Block the call executes in
    pub block_number: BlockNumber,
    /// Timestamp of that block
    pub timestamp: Timestamp,
}

impl CallContext {
    /// Same block and time, different immediate caller
    pub fn with_sender(&self, sender: Address) -> Self {
        Self { sender, ..*self }
    }
}

/// An open transaction; holds the chain's write lock until dropped
pub struct Transaction {
    ctx: CallContext,
    _guard: OwnedMutexGuard<()>,
}

impl Transaction {
    /// Context of the transaction's outermost call
    pub fn ctx(&self) -> &CallContext {
        &self.ctx
    }
}

/// Shared chain handle
#[derive(Clone)]
pub struct Chain {
    clock: Arc<BlockClock>,
    bank: Arc<Bank>,
    tx_lock: Arc<Mutex<()>>,
    nonce: Arc<AtomicU64>,
}

impl Chain {
    /// Create a chain with a wall-clock driven clock
    pub fn new() -> Self {
        Self::with_clock(BlockClock::system())
    }

    /// Create a chain around an explicit clock
    pub fn with_clock(clock: BlockClock) -> Self {
        Self {
            clock: Arc::new(clock),
            bank: Arc::new(Bank::new()),
            tx_lock: Arc::new(Mutex::new(())),
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The block clock
    pub fn clock(&self) -> &Arc<BlockClock> {
        &self.clock
    }

    /// The native asset bank
    pub fn bank(&self) -> &Arc<Bank> {
        &self.bank
    }

    /// Start a transaction on behalf of `sender`, waiting for any in-flight one
    pub async fn begin(&self, sender: Address) -> Transaction {
        let guard = self.tx_lock.clone().lock_owned().await;
        let block_number = self.clock.mine();
        let ctx = CallContext {
            sender,
            block_number,
            timestamp: self.clock.now(),
        };
        trace!(sender = %sender, block = block_number, "transaction started");
        Transaction { ctx, _guard: guard }
    }

    /// Allocate a fresh address on behalf of `creator`
    pub fn allocate_address(&self, creator: &Address) -> Address {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        Address::derive(creator, nonce)
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}
