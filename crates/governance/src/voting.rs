//! Voting engine application

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use orgkit_acl::roles;
use orgkit_core::utils::hex_bytes;
use orgkit_core::{
    decode_call, downcast_image, encode_return, Address, AppKind, Application, CallContext, CallError, Pct,
    RevertError, Revertible, StateImage,
};
use orgkit_kernel::InstallEnv;

use crate::types::{check_support, Vote, VoteInfo, VoterState, VotingSettings};
use crate::{VotingError, VotingResult};

/// Calls accepted by a voting engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VotingCall {
    /// Open a vote; requires `CREATE_VOTES`
    NewVote {
        #[serde(with = "hex_bytes")]
        script: Vec<u8>,
        metadata: String,
        /// Also cast a yea vote for the caller if it can vote
        #[serde(default)]
        cast_vote: bool,
        #[serde(default)]
        execute_if_decided: bool,
    },
    /// Cast or change a stance
    Vote {
        vote_id: u64,
        supports: bool,
        #[serde(default)]
        execute_if_decided: bool,
    },
    /// Execute an accepted vote
    ExecuteVote { vote_id: u64 },
    /// Requires `MODIFY_SUPPORT`
    ChangeSupportRequired { support_required: Pct },
    /// Requires `MODIFY_QUORUM`
    ChangeMinAcceptQuorum { min_accept_quorum: Pct },
    GetVote { vote_id: u64 },
    CanVote { vote_id: u64, voter: Address },
    CanExecute { vote_id: u64 },
}

#[derive(Debug, Clone)]
struct VotingState {
    support_required: Pct,
    min_accept_quorum: Pct,
    votes: Vec<Vote>,
}

/// Token-weighted voting engine
pub struct Voting {
    env: InstallEnv,
    token: Address,
    vote_time: u64,
    state: RwLock<VotingState>,
}

impl Voting {
    /// Create an engine from validated settings
    pub fn new(env: InstallEnv, settings: VotingSettings) -> Self {
        Self {
            env,
            token: settings.token,
            vote_time: settings.vote_time,
            state: RwLock::new(VotingState {
                support_required: settings.support_required,
                min_accept_quorum: settings.min_accept_quorum,
                votes: Vec::new(),
            }),
        }
    }

    /// Token whose balances are the voting weights
    pub fn token(&self) -> Address {
        self.token
    }

    /// Duration of every vote, in seconds
    pub fn vote_time(&self) -> u64 {
        self.vote_time
    }

    /// Current support requirement for new votes
    pub async fn support_required(&self) -> Pct {
        self.state.read().await.support_required
    }

    /// Current quorum requirement for new votes
    pub async fn min_accept_quorum(&self) -> Pct {
        self.state.read().await.min_accept_quorum
    }

    /// Number of votes ever created; ids are `0..votes_length()`
    pub async fn votes_length(&self) -> u64 {
        self.state.read().await.votes.len() as u64
    }

    async fn authorize(&self, sender: Address, action: &str) -> VotingResult<()> {
        if self.env.can_perform(sender, action).await {
            Ok(())
        } else {
            Err(VotingError::Unauthorized {
                sender,
                action: action.to_string(),
            })
        }
    }

    /// Open a new vote on `script`
    ///
    /// Voting power is fixed at the block before this one. With `cast_vote`
    /// the creator also votes yea if it held tokens at that block.
    pub async fn new_vote(
        &self,
        ctx: &CallContext,
        script: Vec<u8>,
        metadata: &str,
        cast_vote: bool,
        execute_if_decided: bool,
    ) -> VotingResult<u64> {
        self.authorize(ctx.sender, roles::CREATE_VOTES).await?;

        let snapshot_block = ctx.block_number.saturating_sub(1);
        let voting_power = self.env.ledger.total_supply_at(self.token, snapshot_block).await?;
        if voting_power == 0 {
            return Err(VotingError::NoVotingPower(snapshot_block));
        }

        let vote_id = {
            let mut state = self.state.write().await;
            let vote_id = state.votes.len() as u64;
            let vote = Vote {
                creator: ctx.sender,
                metadata: metadata.to_string(),
                opened_at: ctx.timestamp,
                duration: self.vote_time,
                snapshot_block,
                support_required: state.support_required,
                min_accept_quorum: state.min_accept_quorum,
                yea: 0,
                nay: 0,
                voting_power,
                script,
                executed: false,
                voters: HashMap::new(),
            };
            state.votes.push(vote);
            vote_id
        };
        info!(
            voting = %self.env.address,
            vote_id,
            creator = %ctx.sender,
            snapshot_block,
            voting_power,
            "Vote created"
        );

        if cast_vote && self.can_vote(ctx, vote_id, ctx.sender).await {
            self.vote(ctx, vote_id, true, execute_if_decided).await?;
        }
        Ok(vote_id)
    }

    /// Cast `ctx.sender`'s stance, replacing any earlier one
    ///
    /// With `execute_if_decided` the vote is executed right away when it is
    /// accepted; a failed execution is logged and does not undo the cast.
    pub async fn vote(
        &self,
        ctx: &CallContext,
        vote_id: u64,
        supports: bool,
        execute_if_decided: bool,
    ) -> VotingResult<()> {
        let voter = ctx.sender;
        let snapshot_block = {
            let state = self.state.read().await;
            let vote = state.votes.get(vote_id as usize).ok_or(VotingError::UnknownVote(vote_id))?;
            if !vote.is_open(ctx.timestamp) {
                return Err(VotingError::VoteClosed(vote_id));
            }
            vote.snapshot_block
        };

        let weight = self.env.ledger.balance_at(self.token, voter, snapshot_block).await?;
        if weight == 0 {
            return Err(VotingError::NotEligible { voter, vote_id });
        }

        let accepted = {
            let mut state = self.state.write().await;
            let vote = state
                .votes
                .get_mut(vote_id as usize)
                .ok_or(VotingError::UnknownVote(vote_id))?;

            match vote.voter_state(&voter) {
                VoterState::Yea => vote.yea -= weight,
                VoterState::Nay => vote.nay -= weight,
                VoterState::Absent => {}
            }
            let stance = if supports {
                vote.yea += weight;
                VoterState::Yea
            } else {
                vote.nay += weight;
                VoterState::Nay
            };
            vote.voters.insert(voter, stance);

            debug!(vote_id, yea = vote.yea, nay = vote.nay, "Tally updated");
            vote.is_accepted()
        };
        info!(voting = %self.env.address, vote_id, voter = %voter, supports, weight, "Vote cast");

        if execute_if_decided && accepted {
            if let Err(e) = self.execute_vote(ctx, vote_id).await {
                warn!(voting = %self.env.address, vote_id, error = %e, "Execution after cast failed");
            }
        }
        Ok(())
    }

    /// Run an accepted vote's script; anyone may call this
    ///
    /// Returns the return data of each script action.
    pub async fn execute_vote(&self, ctx: &CallContext, vote_id: u64) -> VotingResult<Vec<Vec<u8>>> {
        let script = {
            let mut state = self.state.write().await;
            let vote = state
                .votes
                .get_mut(vote_id as usize)
                .ok_or(VotingError::UnknownVote(vote_id))?;
            if vote.executed {
                return Err(VotingError::AlreadyExecuted(vote_id));
            }
            if !vote.is_accepted() {
                return Err(VotingError::ThresholdNotMet(vote_id));
            }
            // marked before running so the script cannot execute it again
            vote.executed = true;
            vote.script.clone()
        };

        match self.env.executor.run(&ctx.with_sender(self.env.address), &script).await {
            Ok(outputs) => {
                info!(voting = %self.env.address, vote_id, by = %ctx.sender, "Vote executed");
                Ok(outputs)
            }
            Err(source) => {
                if let Some(vote) = self.state.write().await.votes.get_mut(vote_id as usize) {
                    vote.executed = false;
                }
                warn!(voting = %self.env.address, vote_id, error = %source, "Vote execution reverted");
                Err(VotingError::ExecutionReverted { vote_id, source })
            }
        }
    }

    /// Change the support requirement for future votes
    pub async fn change_support_required(&self, ctx: &CallContext, support_required: Pct) -> VotingResult<()> {
        self.authorize(ctx.sender, roles::MODIFY_SUPPORT).await?;
        let mut state = self.state.write().await;
        check_support(support_required, state.min_accept_quorum)?;
        state.support_required = support_required;
        info!(voting = %self.env.address, support_required = %support_required, "Support requirement changed");
        Ok(())
    }

    /// Change the quorum requirement for future votes
    pub async fn change_min_accept_quorum(&self, ctx: &CallContext, min_accept_quorum: Pct) -> VotingResult<()> {
        self.authorize(ctx.sender, roles::MODIFY_QUORUM).await?;
        let mut state = self.state.write().await;
        if min_accept_quorum > state.support_required {
            return Err(VotingError::InvalidQuorum {
                quorum: min_accept_quorum,
                support: state.support_required,
            });
        }
        state.min_accept_quorum = min_accept_quorum;
        info!(voting = %self.env.address, min_accept_quorum = %min_accept_quorum, "Quorum requirement changed");
        Ok(())
    }

    /// View of a vote as of `now`
    pub async fn get_vote(&self, vote_id: u64, now: u64) -> VotingResult<VoteInfo> {
        let state = self.state.read().await;
        let vote = state.votes.get(vote_id as usize).ok_or(VotingError::UnknownVote(vote_id))?;
        Ok(vote.info(now))
    }

    /// Stance of `voter` in a vote
    pub async fn voter_state(&self, vote_id: u64, voter: Address) -> VotingResult<VoterState> {
        let state = self.state.read().await;
        let vote = state.votes.get(vote_id as usize).ok_or(VotingError::UnknownVote(vote_id))?;
        Ok(vote.voter_state(&voter))
    }

    /// Whether `voter` could cast a stance now
    pub async fn can_vote(&self, ctx: &CallContext, vote_id: u64, voter: Address) -> bool {
        let snapshot_block = {
            let state = self.state.read().await;
            match state.votes.get(vote_id as usize) {
                Some(vote) if vote.is_open(ctx.timestamp) => vote.snapshot_block,
                _ => return false,
            }
        };
        matches!(
            self.env.ledger.balance_at(self.token, voter, snapshot_block).await,
            Ok(weight) if weight > 0
        )
    }

    /// Whether a vote could be executed now
    pub async fn can_execute(&self, vote_id: u64) -> bool {
        let state = self.state.read().await;
        state
            .votes
            .get(vote_id as usize)
            .map(|vote| !vote.executed && vote.is_accepted())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Revertible for Voting {
    async fn save_state(&self) -> StateImage {
        Box::new(self.state.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        *self.state.write().await = downcast_image(image, "voting")?;
        Ok(())
    }
}

#[async_trait]
impl Application for Voting {
    fn kind(&self) -> AppKind {
        AppKind::Voting
    }

    fn address(&self) -> Address {
        self.env.address
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            VotingCall::NewVote {
                script,
                metadata,
                cast_vote,
                execute_if_decided,
            } => encode_return(
                &self
                    .new_vote(ctx, script, &metadata, cast_vote, execute_if_decided)
                    .await?,
            ),
            VotingCall::Vote {
                vote_id,
                supports,
                execute_if_decided,
            } => encode_return(&self.vote(ctx, vote_id, supports, execute_if_decided).await?),
            VotingCall::ExecuteVote { vote_id } => encode_return(&self.execute_vote(ctx, vote_id).await?),
            VotingCall::ChangeSupportRequired { support_required } => {
                encode_return(&self.change_support_required(ctx, support_required).await?)
            }
            VotingCall::ChangeMinAcceptQuorum { min_accept_quorum } => {
                encode_return(&self.change_min_accept_quorum(ctx, min_accept_quorum).await?)
            }
            VotingCall::GetVote { vote_id } => encode_return(&self.get_vote(vote_id, ctx.timestamp).await?),
            VotingCall::CanVote { vote_id, voter } => encode_return(&self.can_vote(ctx, vote_id, voter).await),
            VotingCall::CanExecute { vote_id } => encode_return(&self.can_execute(vote_id).await),
        }
    }
}
