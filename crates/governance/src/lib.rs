//! Governance module for orgkit
//!
//! A voting engine runs independent, time-boxed, token-weighted votes.
//! Voting power is read from the engine's token at the block before the
//! vote was created, so minting during a vote changes nothing for it.
//! A vote that reaches its support and quorum requirements (both measured
//! against total voting power) can be executed once, which runs its action
//! script through the organization's executor.

use thiserror::Error;

use orgkit_core::{Address, CallError, ExecutionError, Pct};
use orgkit_ledger::LedgerError;

pub mod types;
pub mod voting;

pub use types::{VoteInfo, VoterState, VotingSettings};
pub use voting::{Voting, VotingCall};

/// Error types for voting operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VotingError {
    /// The caller lacks the required capability
    #[error("Unauthorized: {sender} lacks {action}")]
    Unauthorized { sender: Address, action: String },

    /// No vote with this id
    #[error("Unknown vote: {0}")]
    UnknownVote(u64),

    /// The vote's window has passed or it was executed
    #[error("Vote {0} is closed")]
    VoteClosed(u64),

    /// The voter had no balance at the snapshot block
    #[error("{voter} has no voting power in vote {vote_id}")]
    NotEligible { voter: Address, vote_id: u64 },

    /// The vote was already executed
    #[error("Vote {0} was already executed")]
    AlreadyExecuted(u64),

    /// Support or quorum is below the requirement
    #[error("Vote {0} does not meet its support and quorum requirements")]
    ThresholdNotMet(u64),

    /// The vote's script failed; nothing from it was kept
    #[error("Execution of vote {vote_id} reverted: {source}")]
    ExecutionReverted {
        vote_id: u64,
        #[source]
        source: ExecutionError,
    },

    /// The token had no supply at the snapshot block
    #[error("No voting power at block {0}")]
    NoVotingPower(u64),

    /// Support below quorum, or support of 100% or more
    #[error("Invalid support requirement {support}: must be at least quorum {quorum} and below 100%")]
    InvalidSupport { support: Pct, quorum: Pct },

    /// Quorum above support
    #[error("Invalid quorum {quorum}: must not exceed support {support}")]
    InvalidQuorum { quorum: Pct, support: Pct },

    /// Token ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result type for voting operations
pub type VotingResult<T> = Result<T, VotingError>;

impl From<VotingError> for CallError {
    fn from(err: VotingError) -> Self {
        match err {
            VotingError::Unauthorized { sender, action } => CallError::Unauthorized { sender, action },
            other => CallError::Reverted(other.to_string()),
        }
    }
}
