//! End-to-end tests: provision an organization with both phases, then
//! govern it through its three voting engines.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use orgkit::acl::roles;
use orgkit::apps::{AgentCall, AppError, Finance, FinanceCall, TokenManager, TokenManagerCall};
use orgkit::core::{
    decode_call, decode_return, downcast_image, encode_call, encode_return, namehash, sha256, Action, ActionScript,
    Address, AppKind, Application, BlockClock, CallContext, CallError, Chain, MemoryStorage, RevertError,
    Revertible, StateImage, TOKEN_UNIT,
};
use orgkit::config::KitConfig;
use orgkit::governance::{Voting, VotingCall, VotingError};
use orgkit::kernel::{InstallEnv, KernelError, Organization};
use orgkit::kit::{publish_required_apps, OrgKit, Phase1Receipt, Phase2Receipt};
use orgkit::ledger::{CheckpointLedger, TokenLedger};
use orgkit::registry::{NameRegistry, PackageIndex, PackageVersion, SemanticVersion};

const VOTING_TIME: u64 = 48 * 60 * 60;
const SUPERMAJORITY_SUPPORT: u64 = 666_666_666_666_666_666;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum CounterCall {
    Execute,
}

/// Execution target that counts calls
struct Counter {
    address: Address,
    calls: RwLock<Vec<Address>>,
}

impl Counter {
    async fn count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl Revertible for Counter {
    async fn save_state(&self) -> StateImage {
        Box::new(self.calls.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        *self.calls.write().await = downcast_image(image, "counter")?;
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

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            CounterCall::Execute => {
                self.calls.write().await.push(ctx.sender);
                encode_return(&())
            }
        }
    }
}

struct Deployed {
    chain: Chain,
    kit: OrgKit,
    ledger: Arc<CheckpointLedger>,
    org: Arc<Organization>,
    p1: Phase1Receipt,
    p2: Phase2Receipt,
    members: Vec<Address>,
    council: Vec<Address>,
    counter: Arc<Counter>,
}

fn principals(prefix: &str, n: usize) -> Vec<Address> {
    (0..n).map(|i| Address::from_label(&format!("{}{}", prefix, i))).collect()
}

async fn deploy() -> Deployed {
    let chain = Chain::with_clock(BlockClock::manual(1_500_000_000));
    let names = Arc::new(NameRegistry::new());
    let packages = Arc::new(PackageIndex::new());
    let config = KitConfig::default();
    publish_required_apps(&names, &packages, &config.registry_domain, Address::from_label("publisher"))
        .await
        .unwrap();
    let ledger = Arc::new(CheckpointLedger::new(Address::from_label("ledger")));
    let kit = OrgKit::new(
        Address::from_label("kit"),
        chain.clone(),
        names,
        packages,
        ledger.clone(),
        Arc::new(MemoryStorage::new()),
        config,
    )
    .unwrap();

    let owner = Address::from_label("owner");
    let members = principals("member", 3);
    let council = principals("council", 3);

    let p1 = {
        let tx = chain.begin(owner).await;
        kit.begin_provisioning(tx.ctx(), &members).await.unwrap()
    };
    let p2 = {
        let tx = chain.begin(owner).await;
        kit.complete_provisioning(
            tx.ctx(),
            p1.organization,
            p1.membership_voting,
            p1.supermajority_voting,
            &council,
            &p1.continuation,
        )
        .await
        .unwrap()
    };
    let org = kit.organization(p1.organization).await.unwrap();

    // Installed as if ratified by a membership vote; only the holder of
    // APP_MANAGER can do this
    let counter = {
        let tx = chain.begin(owner).await;
        let package = PackageVersion {
            app_id: namehash("counter.test"),
            version: SemanticVersion(1, 0, 0),
            code_ref: sha256(b"counter"),
        };
        org.install(&tx.ctx().with_sender(p1.membership_voting), &package, |env: InstallEnv| Counter {
            address: env.address,
            calls: RwLock::new(Vec::new()),
        })
        .await
        .unwrap()
    };

    Deployed {
        chain,
        kit,
        ledger,
        org,
        p1,
        p2,
        members,
        council,
        counter,
    }
}

fn script(actions: Vec<(Address, Vec<u8>)>) -> Vec<u8> {
    ActionScript::new(actions.into_iter().map(|(target, calldata)| Action::new(target, calldata)).collect())
        .encode()
        .unwrap()
}

impl Deployed {
    async fn engine(&self, address: Address) -> Arc<Voting> {
        self.org.app_as::<Voting>(address).await.unwrap()
    }

    async fn token_manager(&self, address: Address) -> Arc<TokenManager> {
        self.org.app_as::<TokenManager>(address).await.unwrap()
    }

    fn counter_script(&self, times: usize) -> Vec<u8> {
        let call = encode_call(&CounterCall::Execute).unwrap();
        script((0..times).map(|_| (self.counter.address(), call.clone())).collect())
    }

    /// Open a vote the way holders do: forward a `new_vote` call through
    /// the cohort's token manager
    async fn open_vote(&self, token_manager: Address, engine: Address, holder: Address, vote_script: Vec<u8>) -> u64 {
        let call = VotingCall::NewVote {
            script: vote_script,
            metadata: "metadata".to_string(),
            cast_vote: false,
            execute_if_decided: false,
        };
        let forwarded = script(vec![(engine, encode_call(&call).unwrap())]);
        let tx = self.chain.begin(holder).await;
        let outputs = self
            .token_manager(token_manager)
            .await
            .forward(tx.ctx(), &forwarded)
            .await
            .unwrap();
        decode_return(&outputs[0]).unwrap()
    }

    async fn cast(&self, engine: Address, holder: Address, vote_id: u64, supports: bool) -> Result<(), VotingError> {
        let tx = self.chain.begin(holder).await;
        self.engine(engine).await.vote(tx.ctx(), vote_id, supports, false).await
    }

    async fn execute(&self, engine: Address, vote_id: u64) -> Result<Vec<Vec<u8>>, VotingError> {
        let tx = self.chain.begin(Address::from_label("anyone")).await;
        self.engine(engine).await.execute_vote(tx.ctx(), vote_id).await
    }

    /// Open a vote, have the first two holders approve it, and execute it
    /// after the window
    async fn ratify(&self, token_manager: Address, engine: Address, holders: &[Address], vote_script: Vec<u8>) -> u64 {
        let vote_id = self.open_vote(token_manager, engine, holders[0], vote_script).await;
        for holder in &holders[..2] {
            self.cast(engine, *holder, vote_id, true).await.unwrap();
        }
        self.chain.clock().advance(VOTING_TIME + 1);
        self.execute(engine, vote_id).await.unwrap();
        vote_id
    }
}

#[tokio::test]
async fn test_engines_are_configured() {
    let d = deploy().await;

    let membership = d.engine(d.p1.membership_voting).await;
    let supermajority = d.engine(d.p1.supermajority_voting).await;
    let council = d.engine(d.p2.council_voting).await;

    assert_eq!(membership.support_required().await.raw(), 500_000_000_000_000_000);
    assert_eq!(supermajority.support_required().await.raw(), SUPERMAJORITY_SUPPORT);
    assert_eq!(council.support_required().await.raw(), 500_000_000_000_000_000);
    for engine in [&membership, &supermajority, &council] {
        assert_eq!(engine.min_accept_quorum().await.raw(), 0);
        assert_eq!(engine.vote_time(), VOTING_TIME);
    }
    assert_eq!(membership.token(), d.p1.membership_token);
    assert_eq!(council.token(), d.p2.council_token);
}

#[tokio::test]
async fn test_capability_layout() {
    let d = deploy().await;
    let acl = d.org.acl();
    let mv = d.p1.membership_voting;

    async fn check(acl: &Arc<dyn orgkit::acl::CapabilityGraph>, resource: Address, action: &str, manager: Address, grantee: Address) {
        assert_eq!(acl.get_permission_manager(resource, action).await, Some(manager), "{} manager", action);
        assert!(acl.has_permission(grantee, resource, action).await, "{} grantee", action);
    }

    check(acl, d.p1.organization, roles::APP_MANAGER, mv, mv).await;
    check(acl, d.p1.acl, roles::CREATE_PERMISSIONS, mv, mv).await;
    assert_eq!(acl.get_permission_manager(d.p1.script_registry, roles::ADD_EXECUTOR).await, Some(Address::ZERO));
    assert_eq!(
        acl.get_permission_manager(d.p1.script_registry, roles::REGISTRY_MANAGER).await,
        Some(Address::ZERO)
    );

    check(acl, d.p1.vault, roles::TRANSFER, mv, d.p1.finance).await;
    for action in [roles::CREATE_PAYMENTS, roles::EXECUTE_PAYMENTS, roles::MANAGE_PAYMENTS] {
        check(acl, d.p1.finance, action, mv, mv).await;
    }
    check(acl, d.p1.membership_token_manager, roles::MINT, mv, mv).await;
    check(acl, d.p2.council_token_manager, roles::MINT, mv, mv).await;

    for (engine, token_manager) in [
        (d.p1.membership_voting, d.p1.membership_token_manager),
        (d.p1.supermajority_voting, d.p1.membership_token_manager),
        (d.p2.council_voting, d.p2.council_token_manager),
    ] {
        check(acl, engine, roles::CREATE_VOTES, engine, token_manager).await;
        check(acl, engine, roles::MODIFY_QUORUM, engine, engine).await;
        check(acl, engine, roles::MODIFY_SUPPORT, engine, engine).await;
    }

    for action in [roles::EXECUTE, roles::RUN_SCRIPT] {
        check(acl, d.p2.protocol_agent, action, mv, d.p1.supermajority_voting).await;
        check(acl, d.p2.technical_agent, action, mv, d.p2.council_voting).await;
    }
}

#[tokio::test]
async fn test_vote_lifecycle_on_every_engine() {
    let d = deploy().await;
    let cohorts = [
        (d.p1.membership_token_manager, d.p1.membership_voting, &d.members),
        (d.p1.membership_token_manager, d.p1.supermajority_voting, &d.members),
        (d.p2.council_token_manager, d.p2.council_voting, &d.council),
    ];

    for (runs, (token_manager, engine, holders)) in cohorts.into_iter().enumerate() {
        let vote_script = d.counter_script(2);
        let vote_id = d.open_vote(token_manager, engine, holders[0], vote_script.clone()).await;

        let tx = d.chain.begin(holders[0]).await;
        let info = d.engine(engine).await.get_vote(vote_id, tx.ctx().timestamp).await.unwrap();
        assert!(info.open);
        assert!(!info.executed);
        assert_eq!(info.snapshot_block, tx.ctx().block_number - 2);
        assert_eq!(info.voting_power, 3 * TOKEN_UNIT);
        assert_eq!((info.yea, info.nay), (0, 0));
        assert_eq!(info.script, vote_script);
        drop(tx);

        // Stance changes replace each other
        for supports in [true, false, true] {
            d.cast(engine, holders[0], vote_id, supports).await.unwrap();
        }
        let info = d.engine(engine).await.get_vote(vote_id, 0).await.unwrap();
        assert_eq!((info.yea, info.nay), (TOKEN_UNIT, 0));

        // One of three is not enough, even for the 50% engines
        d.chain.clock().advance(VOTING_TIME / 2);
        assert!(matches!(d.execute(engine, vote_id).await, Err(VotingError::ThresholdNotMet(_))));

        d.cast(engine, holders[1], vote_id, true).await.unwrap();
        d.chain.clock().advance(VOTING_TIME / 2 + 1);
        assert!(matches!(
            d.cast(engine, holders[2], vote_id, false).await,
            Err(VotingError::VoteClosed(_))
        ));

        d.execute(engine, vote_id).await.unwrap();
        assert_eq!(d.counter.count().await, 2 * (runs + 1));
        assert!(matches!(d.execute(engine, vote_id).await, Err(VotingError::AlreadyExecuted(_))));
    }
}

#[tokio::test]
async fn test_only_holders_take_part() {
    let d = deploy().await;
    let outsider = Address::from_label("outsider");
    let vote_id = d
        .open_vote(d.p1.membership_token_manager, d.p1.membership_voting, d.members[0], d.counter_script(1))
        .await;

    for supports in [true, false] {
        assert!(matches!(
            d.cast(d.p1.membership_voting, outsider, vote_id, supports).await,
            Err(VotingError::NotEligible { .. })
        ));
    }
    // Council members hold no membership tokens
    assert!(matches!(
        d.cast(d.p1.membership_voting, d.council[0], vote_id, true).await,
        Err(VotingError::NotEligible { .. })
    ));

    // Votes can only be opened through the token manager
    let tx = d.chain.begin(d.members[0]).await;
    let direct = d
        .engine(d.p1.membership_voting)
        .await
        .new_vote(tx.ctx(), d.counter_script(1), "direct", false, false)
        .await;
    assert!(matches!(direct, Err(VotingError::Unauthorized { .. })));
    drop(tx);

    let call = VotingCall::NewVote {
        script: d.counter_script(1),
        metadata: String::new(),
        cast_vote: false,
        execute_if_decided: false,
    };
    let tx = d.chain.begin(outsider).await;
    let forwarded = d
        .token_manager(d.p1.membership_token_manager)
        .await
        .forward(tx.ctx(), &script(vec![(d.p1.membership_voting, encode_call(&call).unwrap())]))
        .await;
    assert!(matches!(forwarded, Err(AppError::NotHolder(_))));
}

#[tokio::test]
async fn test_membership_vote_mints_tokens() {
    let d = deploy().await;
    let newcomer = Address::from_label("newcomer");
    let mint = |receiver: Address| {
        encode_call(&TokenManagerCall::Mint {
            receiver,
            amount: TOKEN_UNIT,
        })
        .unwrap()
    };

    d.ratify(
        d.p1.membership_token_manager,
        d.p1.membership_voting,
        &d.members,
        script(vec![
            (d.p1.membership_token_manager, mint(newcomer)),
            (d.p2.council_token_manager, mint(newcomer)),
        ]),
    )
    .await;

    assert_eq!(d.ledger.balance_of(d.p1.membership_token, newcomer).await.unwrap(), TOKEN_UNIT);
    assert_eq!(d.ledger.balance_of(d.p2.council_token, newcomer).await.unwrap(), TOKEN_UNIT);
    assert_eq!(d.ledger.total_supply(d.p1.membership_token).await.unwrap(), 4 * TOKEN_UNIT);
}

#[tokio::test]
async fn test_supermajority_cannot_mint() {
    let d = deploy().await;
    let newcomer = Address::from_label("newcomer");
    let calls = script(vec![
        (d.counter.address(), encode_call(&CounterCall::Execute).unwrap()),
        (
            d.p1.membership_token_manager,
            encode_call(&TokenManagerCall::Mint {
                receiver: newcomer,
                amount: TOKEN_UNIT,
            })
            .unwrap(),
        ),
    ]);

    let engine = d.p1.supermajority_voting;
    let vote_id = d.open_vote(d.p1.membership_token_manager, engine, d.members[0], calls).await;
    for holder in &d.members {
        d.cast(engine, *holder, vote_id, true).await.unwrap();
    }

    assert!(matches!(
        d.execute(engine, vote_id).await,
        Err(VotingError::ExecutionReverted { .. })
    ));
    // Nothing from the script survives, and the vote can be retried
    assert_eq!(d.counter.count().await, 0);
    assert_eq!(d.ledger.balance_of(d.p1.membership_token, newcomer).await.unwrap(), 0);
    assert!(!d.engine(engine).await.get_vote(vote_id, 0).await.unwrap().executed);
}

#[tokio::test]
async fn test_agents_act_for_their_engines() {
    let d = deploy().await;
    let through_agent = |agent: Address| {
        let inner = encode_call(&CounterCall::Execute).unwrap();
        script(vec![(
            agent,
            encode_call(&AgentCall::Execute {
                target: d.counter.address(),
                calldata: inner,
            })
            .unwrap(),
        )])
    };

    d.ratify(
        d.p1.membership_token_manager,
        d.p1.supermajority_voting,
        &d.members,
        through_agent(d.p2.protocol_agent),
    )
    .await;
    d.ratify(
        d.p2.council_token_manager,
        d.p2.council_voting,
        &d.council,
        through_agent(d.p2.technical_agent),
    )
    .await;
    assert_eq!(
        *d.counter.calls.read().await,
        vec![d.p2.protocol_agent, d.p2.technical_agent]
    );

    // The membership engine holds neither agent
    let vote_id = d
        .open_vote(
            d.p1.membership_token_manager,
            d.p1.membership_voting,
            d.members[0],
            through_agent(d.p2.protocol_agent),
        )
        .await;
    for holder in &d.members {
        d.cast(d.p1.membership_voting, *holder, vote_id, true).await.unwrap();
    }
    assert!(matches!(
        d.execute(d.p1.membership_voting, vote_id).await,
        Err(VotingError::ExecutionReverted { .. })
    ));
}

#[tokio::test]
async fn test_treasury_payment_through_a_vote() {
    let d = deploy().await;
    let funder = Address::from_label("funder");
    let receiver = Address::from_label("contractor");
    let finance = d.org.app_as::<Finance>(d.p1.finance).await.unwrap();

    d.chain.bank().credit(funder, 10 * TOKEN_UNIT).await.unwrap();
    {
        let tx = d.chain.begin(funder).await;
        finance.deposit(tx.ctx(), 10 * TOKEN_UNIT, "donation").await.unwrap();
    }
    assert_eq!(d.chain.bank().balance_of(&d.p1.vault).await, 10 * TOKEN_UNIT);

    let payment = FinanceCall::NewPayment {
        receiver,
        amount: 2 * TOKEN_UNIT,
        initial_payment_time: 0,
        interval: 0,
        max_repeats: 1,
        reference: "invoice".to_string(),
    };
    d.ratify(
        d.p1.membership_token_manager,
        d.p1.membership_voting,
        &d.members,
        script(vec![(d.p1.finance, encode_call(&payment).unwrap())]),
    )
    .await;

    assert_eq!(d.chain.bank().balance_of(&receiver).await, 2 * TOKEN_UNIT);
    assert_eq!(d.chain.bank().balance_of(&d.p1.vault).await, 8 * TOKEN_UNIT);

    // Holders cannot pay themselves directly
    let tx = d.chain.begin(d.members[0]).await;
    let direct = finance
        .new_payment(tx.ctx(), d.members[0], TOKEN_UNIT, 0, 0, 1, "self")
        .await;
    assert!(matches!(direct, Err(AppError::Unauthorized { .. })));
}

#[tokio::test]
async fn test_membership_vote_changes_parameters() {
    let d = deploy().await;
    let engine = d.p1.membership_voting;
    let change = VotingCall::ChangeSupportRequired {
        support_required: orgkit::core::Pct::from_percent(60),
    };
    d.ratify(
        d.p1.membership_token_manager,
        engine,
        &d.members,
        script(vec![(engine, encode_call(&change).unwrap())]),
    )
    .await;
    assert_eq!(d.engine(engine).await.support_required().await.raw(), 600_000_000_000_000_000);

    // The supermajority engine's parameters are its own
    let tx = d.chain.begin(d.members[0]).await;
    let result = d
        .engine(d.p1.supermajority_voting)
        .await
        .change_support_required(&tx.ctx().with_sender(engine), orgkit::core::Pct::from_percent(60))
        .await;
    assert!(matches!(result, Err(VotingError::Unauthorized { .. })));
}

#[tokio::test]
async fn test_kit_keeps_no_authority() {
    let d = deploy().await;
    let package = PackageVersion {
        app_id: namehash("intruder.test"),
        version: SemanticVersion(1, 0, 0),
        code_ref: sha256(b"intruder"),
    };
    let tx = d.chain.begin(d.kit.address()).await;
    let result = d
        .org
        .install(tx.ctx(), &package, |env: InstallEnv| Counter {
            address: env.address,
            calls: RwLock::new(Vec::new()),
        })
        .await;
    assert!(matches!(result, Err(KernelError::Unauthorized { .. })));

    let granted = d
        .org
        .acl()
        .create_permission(d.kit.address(), d.kit.address(), d.p1.vault, roles::TRANSFER, d.kit.address())
        .await;
    assert!(granted.is_err());
}
