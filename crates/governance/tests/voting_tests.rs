//! Tests for the voting engine
//!
//! Cohort: 100 tokens split 33 / 16 / 51 across three holders, 50% support,
//! no quorum, one hour per vote.

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use orgkit_acl::roles;
use orgkit_core::{
    decode_call, downcast_image, encode_call, encode_return, tokens, Action, ActionScript, Address, AppKind,
    Application, BlockClock, CallContext, CallError, Chain, Pct, RevertError, Revertible, StateImage,
};
use orgkit_governance::{VoterState, Voting, VotingError, VotingSettings};
use orgkit_kernel::{InstallEnv, Organization, OrganizationFactory};
use orgkit_ledger::{CheckpointLedger, TokenLedger};
use orgkit_registry::{PackageVersion, SemanticVersion};

const HOUR: u64 = 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum CounterCall {
    Increment,
    Fail,
}

struct Counter {
    address: Address,
    count: RwLock<u64>,
}

#[async_trait]
impl Revertible for Counter {
    async fn save_state(&self) -> StateImage {
        Box::new(*self.count.read().await)
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        *self.count.write().await = downcast_image(image, "counter")?;
        Ok(())
    }
}

#[async_trait]
impl Application for Counter {
    fn kind(&self) -> AppKind {
        AppKind::Agent
    }

    fn address(&self) -> Address {
        self.address
    }

    async fn invoke(&self, _ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            CounterCall::Increment => {
                *self.count.write().await += 1;
                encode_return(&())
            }
            CounterCall::Fail => Err(CallError::Reverted("counter refused".to_string())),
        }
    }
}

struct Fixture {
    chain: Chain,
    org: Arc<Organization>,
    ledger: Arc<CheckpointLedger>,
    root: Address,
    token: Address,
    voting: Arc<Voting>,
    counter: Arc<Counter>,
    holders: [Address; 3],
}

fn package(name: &str) -> PackageVersion {
    PackageVersion {
        app_id: orgkit_core::namehash(name),
        version: SemanticVersion(1, 0, 0),
        code_ref: orgkit_core::sha256(name.as_bytes()),
    }
}

async fn setup() -> Fixture {
    let chain = Chain::with_clock(BlockClock::manual(1_000_000));
    let ledger = Arc::new(CheckpointLedger::new(Address::from_label("ledger")));
    let factory = OrganizationFactory::new(Address::from_label("factory"), chain.clone(), ledger.clone());
    let root = Address::from_label("root");
    let holders = [
        Address::from_label("holder1"),
        Address::from_label("holder2"),
        Address::from_label("holder3"),
    ];

    let tx = chain.begin(root).await;
    let ctx = *tx.ctx();
    let org = factory.create(&ctx).await.unwrap();
    let token = ledger.create_token(&ctx, root, "Members", "MBR").await.unwrap();
    for (holder, amount) in holders.iter().zip([33, 16, 51]) {
        ledger.mint(&ctx, token, *holder, tokens(amount)).await.unwrap();
    }

    let settings = VotingSettings::new(token, Pct::from_percent(50), Pct::ZERO, HOUR).unwrap();
    let voting = org
        .install(&ctx, &package("voting.test"), |env| Voting::new(env, settings))
        .await
        .unwrap();
    let counter = org
        .install(&ctx, &package("counter.test"), |env: InstallEnv| Counter {
            address: env.address,
            count: RwLock::new(0),
        })
        .await
        .unwrap();

    let acl = org.acl();
    acl.create_permission(root, root, voting.address(), roles::CREATE_VOTES, voting.address())
        .await
        .unwrap();
    for role in [roles::MODIFY_SUPPORT, roles::MODIFY_QUORUM] {
        acl.create_permission(root, root, voting.address(), role, root).await.unwrap();
    }
    drop(tx);

    Fixture {
        chain,
        org,
        ledger,
        root,
        token,
        voting,
        counter,
        holders,
    }
}

fn increments(counter: Address, times: usize) -> Vec<u8> {
    let action = Action::new(counter, encode_call(&CounterCall::Increment).unwrap());
    ActionScript::new(vec![action; times]).encode().unwrap()
}

impl Fixture {
    async fn new_vote(&self, script: Vec<u8>) -> u64 {
        let tx = self.chain.begin(self.root).await;
        self.voting.new_vote(tx.ctx(), script, "test vote", false, false).await.unwrap()
    }

    async fn cast(&self, who: Address, vote_id: u64, supports: bool) -> Result<(), VotingError> {
        let tx = self.chain.begin(who).await;
        self.voting.vote(tx.ctx(), vote_id, supports, false).await
    }

    async fn execute(&self, vote_id: u64) -> Result<Vec<Vec<u8>>, VotingError> {
        let tx = self.chain.begin(Address::from_label("anyone")).await;
        self.voting.execute_vote(tx.ctx(), vote_id).await
    }

    async fn count(&self) -> u64 {
        *self.counter.count.read().await
    }
}

#[tokio::test]
async fn test_insufficient_support_fails() {
    let f = setup().await;
    let vote_id = f.new_vote(increments(f.counter.address(), 2)).await;

    f.cast(f.holders[0], vote_id, true).await.unwrap();
    f.cast(f.holders[1], vote_id, false).await.unwrap();

    assert_eq!(f.execute(vote_id).await.unwrap_err(), VotingError::ThresholdNotMet(vote_id));
    assert_eq!(f.count().await, 0);
}

#[tokio::test]
async fn test_majority_executes_once() {
    let f = setup().await;
    let vote_id = f.new_vote(increments(f.counter.address(), 2)).await;

    f.cast(f.holders[2], vote_id, true).await.unwrap();
    assert!(f.voting.can_execute(vote_id).await);

    let outputs = f.execute(vote_id).await.unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(f.count().await, 2);

    assert_eq!(f.execute(vote_id).await.unwrap_err(), VotingError::AlreadyExecuted(vote_id));
    assert_eq!(f.count().await, 2);

    // executed votes take no more stances
    assert_eq!(
        f.cast(f.holders[0], vote_id, true).await.unwrap_err(),
        VotingError::VoteClosed(vote_id)
    );
}

#[tokio::test]
async fn test_non_holder_is_not_eligible() {
    let f = setup().await;
    let vote_id = f.new_vote(ActionScript::EMPTY.to_vec()).await;
    let outsider = Address::from_label("outsider");

    for supports in [true, false] {
        assert_eq!(
            f.cast(outsider, vote_id, supports).await.unwrap_err(),
            VotingError::NotEligible {
                voter: outsider,
                vote_id
            }
        );
    }
}

#[tokio::test]
async fn test_vote_closes_after_duration() {
    let f = setup().await;
    let vote_id = f.new_vote(ActionScript::EMPTY.to_vec()).await;

    f.chain.clock().advance(HOUR);
    assert_eq!(
        f.cast(f.holders[2], vote_id, true).await.unwrap_err(),
        VotingError::VoteClosed(vote_id)
    );
    let tx = f.chain.begin(f.root).await;
    assert!(!f.voting.get_vote(vote_id, tx.ctx().timestamp).await.unwrap().open);
}

#[tokio::test]
async fn test_accepted_vote_executes_after_expiry() {
    let f = setup().await;
    let vote_id = f.new_vote(increments(f.counter.address(), 1)).await;
    f.cast(f.holders[2], vote_id, true).await.unwrap();

    f.chain.clock().advance(2 * HOUR);
    f.execute(vote_id).await.unwrap();
    assert_eq!(f.count().await, 1);
}

#[tokio::test]
async fn test_changing_stance_replaces_weight() {
    let f = setup().await;
    let vote_id = f.new_vote(ActionScript::EMPTY.to_vec()).await;
    let holder = f.holders[0];

    f.cast(holder, vote_id, true).await.unwrap();
    f.cast(holder, vote_id, false).await.unwrap();
    f.cast(holder, vote_id, true).await.unwrap();

    let tx = f.chain.begin(f.root).await;
    let info = f.voting.get_vote(vote_id, tx.ctx().timestamp).await.unwrap();
    drop(tx);
    assert_eq!(info.yea, tokens(33));
    assert_eq!(info.nay, 0);
    assert_eq!(f.voting.voter_state(vote_id, holder).await.unwrap(), VoterState::Yea);

    // same stance again changes nothing
    f.cast(holder, vote_id, true).await.unwrap();
    let tx = f.chain.begin(f.root).await;
    assert_eq!(f.voting.get_vote(vote_id, tx.ctx().timestamp).await.unwrap().yea, tokens(33));
}

#[tokio::test]
async fn test_power_is_fixed_at_snapshot() {
    let f = setup().await;
    let vote_id = f.new_vote(ActionScript::EMPTY.to_vec()).await;
    let late = Address::from_label("late-holder");

    {
        let tx = f.chain.begin(f.root).await;
        f.ledger.mint(tx.ctx(), f.token, late, tokens(1_000)).await.unwrap();
    }

    let tx = f.chain.begin(f.root).await;
    let info = f.voting.get_vote(vote_id, tx.ctx().timestamp).await.unwrap();
    drop(tx);
    assert_eq!(info.voting_power, tokens(100));
    assert!(matches!(
        f.cast(late, vote_id, true).await,
        Err(VotingError::NotEligible { .. })
    ));
}

#[tokio::test]
async fn test_failed_script_leaves_vote_unexecuted() {
    let f = setup().await;
    let script = ActionScript::new(vec![
        Action::new(f.counter.address(), encode_call(&CounterCall::Increment).unwrap()),
        Action::new(f.counter.address(), encode_call(&CounterCall::Fail).unwrap()),
    ])
    .encode()
    .unwrap();
    let vote_id = f.new_vote(script).await;
    f.cast(f.holders[2], vote_id, true).await.unwrap();

    assert!(matches!(
        f.execute(vote_id).await,
        Err(VotingError::ExecutionReverted { .. })
    ));
    assert_eq!(f.count().await, 0);

    let tx = f.chain.begin(f.root).await;
    let info = f.voting.get_vote(vote_id, tx.ctx().timestamp).await.unwrap();
    assert!(!info.executed);
    assert_eq!(info.yea, tokens(51));
    assert!(f.voting.can_execute(vote_id).await);
}

#[tokio::test]
async fn test_execute_if_decided_runs_inline() {
    let f = setup().await;
    let vote_id = f.new_vote(increments(f.counter.address(), 1)).await;

    let tx = f.chain.begin(f.holders[2]).await;
    f.voting.vote(tx.ctx(), vote_id, true, true).await.unwrap();
    drop(tx);

    assert_eq!(f.count().await, 1);
    assert_eq!(f.execute(vote_id).await.unwrap_err(), VotingError::AlreadyExecuted(vote_id));
}

#[tokio::test]
async fn test_create_requires_capability() {
    let f = setup().await;
    let tx = f.chain.begin(f.holders[0]).await;
    let err = f
        .voting
        .new_vote(tx.ctx(), ActionScript::EMPTY.to_vec(), "", false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, VotingError::Unauthorized { .. }));
    assert_eq!(f.voting.votes_length().await, 0);
}

#[tokio::test]
async fn test_no_voting_power() {
    let f = setup().await;
    let tx = f.chain.begin(f.root).await;
    let ctx = *tx.ctx();
    let empty = f.ledger.create_token(&ctx, f.root, "Empty", "NIL").await.unwrap();
    let settings = VotingSettings::new(empty, Pct::from_percent(50), Pct::ZERO, HOUR).unwrap();
    let voting = f
        .org
        .install(&ctx, &package("voting.test"), |env| Voting::new(env, settings))
        .await
        .unwrap();
    f.org
        .acl()
        .create_permission(f.root, f.root, voting.address(), roles::CREATE_VOTES, f.root)
        .await
        .unwrap();

    let err = voting
        .new_vote(&ctx, ActionScript::EMPTY.to_vec(), "", false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, VotingError::NoVotingPower(_)));
}

#[tokio::test]
async fn test_parameter_changes_do_not_touch_open_votes() {
    let f = setup().await;
    let vote_id = f.new_vote(increments(f.counter.address(), 1)).await;

    let tx = f.chain.begin(f.root).await;
    let ctx = *tx.ctx();
    f.voting.change_support_required(&ctx, Pct::from_percent(60)).await.unwrap();
    f.voting.change_min_accept_quorum(&ctx, Pct::from_percent(20)).await.unwrap();
    assert!(matches!(
        f.voting.change_support_required(&ctx, Pct::ONE).await,
        Err(VotingError::InvalidSupport { .. })
    ));
    assert!(matches!(
        f.voting.change_support_required(&ctx, Pct::from_percent(10)).await,
        Err(VotingError::InvalidSupport { .. })
    ));
    assert!(matches!(
        f.voting.change_min_accept_quorum(&ctx, Pct::from_percent(70)).await,
        Err(VotingError::InvalidQuorum { .. })
    ));
    assert!(matches!(
        f.voting.change_support_required(&ctx.with_sender(f.holders[0]), Pct::from_percent(55)).await,
        Err(VotingError::Unauthorized { .. })
    ));
    drop(tx);

    assert_eq!(f.voting.support_required().await, Pct::from_percent(60));
    f.cast(f.holders[2], vote_id, true).await.unwrap();
    // still judged at 50%
    f.execute(vote_id).await.unwrap();
    assert_eq!(f.count().await, 1);
}

#[tokio::test]
async fn test_vote_through_calldata() {
    let f = setup().await;
    let vote_id = f.new_vote(ActionScript::EMPTY.to_vec()).await;
    let call = serde_json::json!({ "method": "vote", "vote_id": vote_id, "supports": false });

    let tx = f.chain.begin(f.holders[1]).await;
    f.voting
        .invoke(tx.ctx(), &serde_json::to_vec(&call).unwrap())
        .await
        .unwrap();
    assert_eq!(
        f.voting.voter_state(vote_id, f.holders[1]).await.unwrap(),
        VoterState::Nay
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_tally_never_exceeds_power(casts in proptest::collection::vec((0usize..3, any::<bool>()), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let f = setup().await;
            let vote_id = f.new_vote(ActionScript::EMPTY.to_vec()).await;

            for (who, supports) in casts {
                f.cast(f.holders[who], vote_id, supports).await.unwrap();
                let tx = f.chain.begin(f.root).await;
                let info = f.voting.get_vote(vote_id, tx.ctx().timestamp).await.unwrap();
                assert!(info.yea + info.nay <= info.voting_power);
            }
        });
    }
}
