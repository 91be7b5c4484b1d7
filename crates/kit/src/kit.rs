//! The provisioning orchestrator
//!
//! Every precondition of a phase is checked before the phase mutates
//! anything. Failures after that point are not rolled back: the
//! organization is left inert, with the kit still holding its root
//! capabilities.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use orgkit_acl::{roles, CapabilityGraph};
use orgkit_apps::{Agent, Finance, TokenManager, Vault};
use orgkit_config::{KitConfig, VoteDurations, VotingParams};
use orgkit_core::{
    namehash, Address, AppKind, Application, CallContext, Chain, Storage, StorageError, StorageResult, TOKEN_UNIT,
};
use orgkit_governance::{Voting, VotingSettings};
use orgkit_kernel::{Organization, OrganizationFactory};
use orgkit_ledger::TokenLedger;
use orgkit_registry::{NameResolver, PackageRegistry, PackageVersion};

use crate::session::{ContinuationToken, ProvisioningSession, SessionSigner, SessionStatus, SESSIONS_PATH};
use crate::{KitError, KitResult};

/// Addresses created by phase 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase1Receipt {
    pub organization: Address,
    /// Capability graph root
    pub acl: Address,
    pub script_registry: Address,
    pub membership_token: Address,
    pub vault: Address,
    pub finance: Address,
    pub membership_token_manager: Address,
    pub membership_voting: Address,
    pub supermajority_voting: Address,
    /// Required by phase 2
    pub continuation: ContinuationToken,
}

/// Addresses created by phase 2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase2Receipt {
    pub organization: Address,
    pub council_token: Address,
    pub council_token_manager: Address,
    pub council_voting: Address,
    pub protocol_agent: Address,
    pub technical_agent: Address,
}

/// Latest package of every required application kind
struct ResolvedPackages(HashMap<AppKind, PackageVersion>);

impl ResolvedPackages {
    fn get(&self, kind: AppKind) -> KitResult<&PackageVersion> {
        self.0.get(&kind).ok_or(KitError::UnresolvedApplicationKind(kind))
    }
}

/// Two-phase organization provisioning
///
/// `complete_provisioning` must be called exactly once per organization,
/// by the principal that called `begin_provisioning`.
pub struct OrgKit {
    address: Address,
    names: Arc<dyn NameResolver>,
    packages: Arc<dyn PackageRegistry>,
    ledger: Arc<dyn TokenLedger>,
    factory: OrganizationFactory,
    storage: Arc<dyn Storage>,
    config: KitConfig,
    signer: SessionSigner,
    organizations: RwLock<HashMap<Address, Arc<Organization>>>,
}

impl OrgKit {
    /// Create a kit with a freshly generated session secret
    pub fn new(
        address: Address,
        chain: Chain,
        names: Arc<dyn NameResolver>,
        packages: Arc<dyn PackageRegistry>,
        ledger: Arc<dyn TokenLedger>,
        storage: Arc<dyn Storage>,
        config: KitConfig,
    ) -> KitResult<Self> {
        config.validate()?;
        let factory = OrganizationFactory::new(chain.allocate_address(&address), chain, ledger.clone());
        Ok(Self {
            address,
            names,
            packages,
            ledger,
            factory,
            storage,
            config,
            signer: SessionSigner::generate()?,
            organizations: RwLock::new(HashMap::new()),
        })
    }

    /// Use a specific session signer
    pub fn with_signer(mut self, signer: SessionSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Use a specific organization factory
    pub fn with_factory(mut self, factory: OrganizationFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Principal the kit acts as
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &KitConfig {
        &self.config
    }

    /// An organization created by this kit
    pub async fn organization(&self, address: Address) -> Option<Arc<Organization>> {
        self.organizations.read().await.get(&address).cloned()
    }

    /// The provisioning session of an organization
    pub async fn session(&self, organization: Address) -> KitResult<ProvisioningSession> {
        match self.get_json(&ProvisioningSession::storage_key(&organization)).await {
            Ok(session) => Ok(session),
            Err(StorageError::KeyNotFound(_)) => Err(KitError::UnknownSession(organization)),
            Err(e) => Err(e.into()),
        }
    }

    /// Every persisted session
    pub async fn sessions(&self) -> KitResult<Vec<ProvisioningSession>> {
        let mut sessions = Vec::new();
        for key in self.storage.list(SESSIONS_PATH).await? {
            sessions.push(self.get_json(&key).await?);
        }
        Ok(sessions)
    }

    /// Phase 1 with the configured vote durations
    pub async fn begin_provisioning(&self, ctx: &CallContext, initial_holders: &[Address]) -> KitResult<Phase1Receipt> {
        self.provision(ctx, initial_holders, self.config.vote_durations()).await
    }

    /// Phase 1 with explicit vote durations
    ///
    /// The durations only apply when both are positive; otherwise every
    /// engine gets the configured default.
    pub async fn begin_provisioning_with_vote_times(
        &self,
        ctx: &CallContext,
        initial_holders: &[Address],
        membership_vote_time: u64,
        supermajority_vote_time: u64,
    ) -> KitResult<Phase1Receipt> {
        let mut config = self.config.clone();
        config.membership_vote_duration = Some(membership_vote_time);
        config.supermajority_vote_duration = Some(supermajority_vote_time);
        self.provision(ctx, initial_holders, config.vote_durations()).await
    }

    async fn provision(
        &self,
        ctx: &CallContext,
        initial_holders: &[Address],
        durations: VoteDurations,
    ) -> KitResult<Phase1Receipt> {
        let holders: BTreeSet<Address> = initial_holders.iter().copied().collect();
        if holders.is_empty() {
            return Err(KitError::EmptyCohort("membership".to_string()));
        }
        let packages = self.resolve_packages().await?;

        let initiator = ctx.sender;
        let kit = ctx.with_sender(self.address);
        let org = self.factory.create(&kit).await?;
        let acl = org.acl().clone();

        let cohort = &self.config.membership;
        let token = self
            .ledger
            .create_token(&kit, self.address, &cohort.token_name, &cohort.token_symbol)
            .await?;

        let vault = org.install(&kit, packages.get(AppKind::Vault)?, Vault::new).await?;
        let vault_address = vault.address();
        let finance_period = self.config.finance_period;
        let finance = org
            .install(&kit, packages.get(AppKind::Finance)?, |env| {
                Finance::new(env, vault_address, finance_period, ctx.timestamp)
            })
            .await?;
        let token_manager = org
            .install(&kit, packages.get(AppKind::TokenManager)?, |env| TokenManager::new(env, token))
            .await?;
        let membership_voting = self
            .install_voting(&org, &kit, &packages, token, &cohort.voting, durations.membership)
            .await?;
        let supermajority_voting = self
            .install_voting(&org, &kit, &packages, token, &self.config.supermajority, durations.supermajority)
            .await?;

        self.ledger.change_controller(&kit, token, token_manager.address()).await?;
        acl.create_permission(self.address, self.address, token_manager.address(), roles::MINT, self.address)
            .await?;
        for holder in &holders {
            token_manager.mint(&kit, *holder, TOKEN_UNIT).await?;
        }

        for engine in [membership_voting, supermajority_voting] {
            self.wire_engine(&acl, engine, token_manager.address()).await?;
        }

        let receipt = Phase1Receipt {
            organization: org.address(),
            acl: acl.root(),
            script_registry: org.script_registry(),
            membership_token: token,
            vault: vault_address,
            finance: finance.address(),
            membership_token_manager: token_manager.address(),
            membership_voting,
            supermajority_voting,
            continuation: self
                .signer
                .sign(org.address(), initiator, membership_voting, supermajority_voting),
        };
        let session = ProvisioningSession {
            initiator,
            phase1: receipt.clone(),
            vote_durations: durations,
            status: SessionStatus::Pending,
            begun_at_block: ctx.block_number,
            completed_at_block: None,
        };
        self.put_json(&ProvisioningSession::storage_key(&org.address()), &session)
            .await?;
        self.organizations.write().await.insert(org.address(), org);

        info!(
            organization = %receipt.organization,
            initiator = %initiator,
            holders = holders.len(),
            block = ctx.block_number,
            "Provisioning phase 1 completed"
        );
        Ok(receipt)
    }

    /// Phase 2: install the council cohort and agents, then hand every
    /// capability the kit still holds to the organization's engines
    ///
    /// Call exactly once per organization. Every rejection happens before
    /// any state changes. Once wiring starts the session is marked
    /// `Completing`; a failure past that point is not rolled back and later
    /// calls return `InterruptedCompletion` instead of installing the
    /// council cohort a second time.
    pub async fn complete_provisioning(
        &self,
        ctx: &CallContext,
        organization: Address,
        membership_voting: Address,
        supermajority_voting: Address,
        council_holders: &[Address],
        continuation: &ContinuationToken,
    ) -> KitResult<Phase2Receipt> {
        let mut session = self.session(organization).await?;
        if ctx.sender != session.initiator {
            warn!(organization = %organization, sender = %ctx.sender, "Rejected provisioning completion");
            return Err(KitError::UnauthorizedCompletion {
                sender: ctx.sender,
                initiator: session.initiator,
            });
        }
        if !self.signer.verify(
            continuation,
            organization,
            session.initiator,
            membership_voting,
            supermajority_voting,
        ) {
            return Err(KitError::InvalidContinuation);
        }
        match session.status {
            SessionStatus::Pending => {}
            SessionStatus::Completing => return Err(KitError::InterruptedCompletion(organization)),
            SessionStatus::Completed => return Err(KitError::AlreadyCompleted(organization)),
        }
        let holders: BTreeSet<Address> = council_holders.iter().copied().collect();
        if holders.is_empty() {
            return Err(KitError::EmptyCohort("council".to_string()));
        }
        let packages = self.resolve_packages().await?;
        let org = self
            .organization(organization)
            .await
            .ok_or(KitError::UnknownSession(organization))?;

        let session_key = ProvisioningSession::storage_key(&organization);
        session.status = SessionStatus::Completing;
        self.put_json(&session_key, &session).await?;

        let kit = ctx.with_sender(self.address);
        let acl = org.acl().clone();
        let phase1 = session.phase1.clone();

        let cohort = &self.config.council;
        let council_token = self
            .ledger
            .create_token(&kit, self.address, &cohort.token_name, &cohort.token_symbol)
            .await?;
        let council_token_manager = org
            .install(&kit, packages.get(AppKind::TokenManager)?, |env| {
                TokenManager::new(env, council_token)
            })
            .await?;
        let council_voting = self
            .install_voting(
                &org,
                &kit,
                &packages,
                council_token,
                &cohort.voting,
                session.vote_durations.council,
            )
            .await?;
        let protocol_agent = org.install(&kit, packages.get(AppKind::Agent)?, Agent::new).await?;
        let technical_agent = org.install(&kit, packages.get(AppKind::Agent)?, Agent::new).await?;

        self.ledger
            .change_controller(&kit, council_token, council_token_manager.address())
            .await?;
        acl.create_permission(
            self.address,
            self.address,
            council_token_manager.address(),
            roles::MINT,
            self.address,
        )
        .await?;
        for holder in &holders {
            council_token_manager.mint(&kit, *holder, TOKEN_UNIT).await?;
        }

        // Treasury
        acl.create_permission(self.address, phase1.finance, phase1.vault, roles::TRANSFER, membership_voting)
            .await?;
        for action in [roles::CREATE_PAYMENTS, roles::EXECUTE_PAYMENTS, roles::MANAGE_PAYMENTS] {
            acl.create_permission(self.address, membership_voting, phase1.finance, action, membership_voting)
                .await?;
        }

        // Token managers
        self.hand_over(&acl, phase1.membership_token_manager, roles::MINT, membership_voting)
            .await?;
        self.hand_over(&acl, council_token_manager.address(), roles::MINT, membership_voting)
            .await?;

        self.wire_engine(&acl, council_voting, council_token_manager.address())
            .await?;

        // Agents
        for action in [roles::EXECUTE, roles::RUN_SCRIPT] {
            acl.create_permission(
                self.address,
                supermajority_voting,
                protocol_agent.address(),
                action,
                membership_voting,
            )
            .await?;
            acl.create_permission(self.address, council_voting, technical_agent.address(), action, membership_voting)
                .await?;
        }

        for action in [roles::ADD_EXECUTOR, roles::REGISTRY_MANAGER] {
            self.freeze(&acl, org.script_registry(), action).await?;
        }

        // CREATE_PERMISSIONS goes last; the kit needs it until here
        self.hand_over(&acl, organization, roles::APP_MANAGER, membership_voting)
            .await?;
        self.hand_over(&acl, acl.root(), roles::CREATE_PERMISSIONS, membership_voting)
            .await?;

        session.status = SessionStatus::Completed;
        session.completed_at_block = Some(ctx.block_number);
        self.put_json(&session_key, &session).await?;

        info!(
            organization = %organization,
            council_holders = holders.len(),
            block = ctx.block_number,
            "Provisioning phase 2 completed"
        );
        Ok(Phase2Receipt {
            organization,
            council_token,
            council_token_manager: council_token_manager.address(),
            council_voting,
            protocol_agent: protocol_agent.address(),
            technical_agent: technical_agent.address(),
        })
    }

    /// Resolve the registry domain and the latest package of each required kind
    async fn resolve_packages(&self) -> KitResult<ResolvedPackages> {
        let domain = &self.config.registry_domain;
        if self.names.resolve(domain).await.is_none() {
            return Err(KitError::MissingRegistryEntry(domain.clone()));
        }

        let mut resolved = HashMap::new();
        for kind in AppKind::REQUIRED {
            let app_id = namehash(&kind.package_name(domain));
            if self.names.owner(app_id).await.is_none() {
                return Err(KitError::UnresolvedApplicationKind(kind));
            }
            let package = self
                .packages
                .latest_version(app_id)
                .await
                .ok_or(KitError::UnresolvedApplicationKind(kind))?;
            debug!(kind = %kind, version = %package.version, "Application kind resolved");
            resolved.insert(kind, package);
        }
        Ok(ResolvedPackages(resolved))
    }

    async fn install_voting(
        &self,
        org: &Organization,
        kit: &CallContext,
        packages: &ResolvedPackages,
        token: Address,
        params: &VotingParams,
        vote_time: u64,
    ) -> KitResult<Address> {
        let settings = VotingSettings::new(token, params.support_required, params.min_accept_quorum, vote_time)?;
        let voting = org
            .install(kit, packages.get(AppKind::Voting)?, |env| Voting::new(env, settings))
            .await?;
        Ok(voting.address())
    }

    /// Let holders of the engine's token create votes through its token
    /// manager, and let the engine govern its own parameters
    async fn wire_engine(&self, acl: &Arc<dyn CapabilityGraph>, engine: Address, token_manager: Address) -> KitResult<()> {
        acl.create_permission(self.address, token_manager, engine, roles::CREATE_VOTES, engine)
            .await?;
        for action in [roles::MODIFY_SUPPORT, roles::MODIFY_QUORUM] {
            acl.create_permission(self.address, engine, engine, action, engine).await?;
        }
        Ok(())
    }

    /// Move a kit-held capability, and its management, to `to`
    async fn hand_over(
        &self,
        acl: &Arc<dyn CapabilityGraph>,
        resource: Address,
        action: &str,
        to: Address,
    ) -> KitResult<()> {
        acl.grant_permission(self.address, to, resource, action).await?;
        acl.revoke_permission(self.address, self.address, resource, action)
            .await?;
        acl.set_permission_manager(self.address, to, resource, action).await?;
        Ok(())
    }

    /// Drop a kit-held capability and make it immutable
    async fn freeze(&self, acl: &Arc<dyn CapabilityGraph>, resource: Address, action: &str) -> KitResult<()> {
        acl.revoke_permission(self.address, self.address, resource, action)
            .await?;
        acl.set_permission_manager(self.address, Address::ZERO, resource, action)
            .await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> StorageResult<T> {
        let data = self.storage.get(key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn put_json<T: Serialize + Send + Sync>(&self, key: &str, value: &T) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.storage.put(key, &data).await
    }
}
