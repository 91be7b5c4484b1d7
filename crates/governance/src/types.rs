//! Vote data types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orgkit_core::utils::hex_bytes;
use orgkit_core::{Address, BlockNumber, Pct, Timestamp};

use crate::{VotingError, VotingResult};

/// Parameters a voting engine is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSettings {
    /// Token whose balances are the voting weights
    pub token: Address,
    /// Yea share of total power needed to pass
    pub support_required: Pct,
    /// Yea plus nay share of total power needed to pass
    pub min_accept_quorum: Pct,
    /// How long a vote stays open, in seconds
    pub vote_time: u64,
}

impl VotingSettings {
    /// Validated settings: `quorum <= support < 100%`
    pub fn new(token: Address, support_required: Pct, min_accept_quorum: Pct, vote_time: u64) -> VotingResult<Self> {
        check_support(support_required, min_accept_quorum)?;
        Ok(Self {
            token,
            support_required,
            min_accept_quorum,
            vote_time,
        })
    }
}

pub(crate) fn check_support(support: Pct, quorum: Pct) -> VotingResult<()> {
    if support < quorum || support >= Pct::ONE {
        return Err(VotingError::InvalidSupport { support, quorum });
    }
    Ok(())
}

/// A holder's stance in a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterState {
    Absent,
    Yea,
    Nay,
}

/// Public view of a vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub open: bool,
    pub executed: bool,
    pub creator: Address,
    pub metadata: String,
    pub opened_at: Timestamp,
    pub duration: u64,
    pub snapshot_block: BlockNumber,
    pub support_required: Pct,
    pub min_accept_quorum: Pct,
    pub yea: u128,
    pub nay: u128,
    pub voting_power: u128,
    #[serde(with = "hex_bytes")]
    pub script: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct Vote {
    pub creator: Address,
    pub metadata: String,
    pub opened_at: Timestamp,
    pub duration: u64,
    pub snapshot_block: BlockNumber,
    pub support_required: Pct,
    pub min_accept_quorum: Pct,
    pub yea: u128,
    pub nay: u128,
    pub voting_power: u128,
    pub script: Vec<u8>,
    pub executed: bool,
    pub voters: HashMap<Address, VoterState>,
}

impl Vote {
    /// Open for casting: not executed and `now < opened_at + duration`
    pub fn is_open(&self, now: Timestamp) -> bool {
        !self.executed && now < self.opened_at.saturating_add(self.duration)
    }

    /// Both requirements met against total voting power
    pub fn is_accepted(&self) -> bool {
        let cast = self.yea.saturating_add(self.nay);
        self.support_required.is_met_by(self.yea, self.voting_power)
            && self.min_accept_quorum.is_met_by(cast, self.voting_power)
    }

    pub fn voter_state(&self, voter: &Address) -> VoterState {
        self.voters.get(voter).copied().unwrap_or(VoterState::Absent)
    }

    pub fn info(&self, now: Timestamp) -> VoteInfo {
        VoteInfo {
            open: self.is_open(now),
            executed: self.executed,
            creator: self.creator,
            metadata: self.metadata.clone(),
            opened_at: self.opened_at,
            duration: self.duration,
            snapshot_block: self.snapshot_block,
            support_required: self.support_required,
            min_accept_quorum: self.min_accept_quorum,
            yea: self.yea,
            nay: self.nay,
            voting_power: self.voting_power,
            script: self.script.clone(),
        }
    }
}
