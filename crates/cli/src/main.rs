use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use orgkit_apps::Finance;
use orgkit_config::KitConfig;
use orgkit_core::{init_tracing, Address, BlockClock, Chain, MemoryStorage, TOKEN_UNIT};
use orgkit_kit::{publish_required_apps, OrgKit, Phase1Receipt, Phase2Receipt};
use orgkit_ledger::CheckpointLedger;
use orgkit_registry::{NameRegistry, PackageIndex};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file; falls back to ORGKIT_* variables
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision an organization on a fresh in-memory chain
    Deploy {
        /// Initiator and sole initial member
        #[arg(long)]
        owner: Option<Address>,
        /// Additional initial members
        #[arg(long = "member")]
        members: Vec<Address>,
        /// Council members; defaults to the owner
        #[arg(long = "council")]
        council: Vec<Address>,
        /// Membership and council vote duration in seconds
        #[arg(long, requires = "supermajority_vote_time")]
        membership_vote_time: Option<u64>,
        /// Supermajority vote duration in seconds
        #[arg(long, requires = "membership_vote_time")]
        supermajority_vote_time: Option<u64>,
        /// Whole tokens the owner deposits into the treasury after provisioning
        #[arg(long, default_value_t = 0)]
        treasury: u128,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Serialize)]
struct Deployment {
    initiator: Address,
    phase1: Phase1Receipt,
    phase2: Phase2Receipt,
}

fn load_config(path: Option<&str>) -> Result<KitConfig> {
    let config = match path {
        Some(path) => KitConfig::from_file(path),
        None => KitConfig::from_env(),
    };
    config.context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Deploy {
            owner,
            members,
            council,
            membership_vote_time,
            supermajority_vote_time,
            treasury,
        } => {
            let owner = owner.unwrap_or_else(|| Address::from_label("owner"));
            let deployment = deploy(
                config,
                owner,
                members,
                council,
                membership_vote_time.zip(supermajority_vote_time),
                treasury,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&deployment)?);
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

async fn deploy(
    config: KitConfig,
    owner: Address,
    members: Vec<Address>,
    council: Vec<Address>,
    vote_times: Option<(u64, u64)>,
    treasury: u128,
) -> Result<Deployment> {
    let chain = Chain::with_clock(BlockClock::system());
    let names = Arc::new(NameRegistry::new());
    let packages = Arc::new(PackageIndex::new());
    publish_required_apps(&names, &packages, &config.registry_domain, Address::from_label("publisher")).await?;

    let kit = OrgKit::new(
        Address::from_label("orgkit"),
        chain.clone(),
        names,
        packages,
        Arc::new(CheckpointLedger::new(Address::from_label("ledger"))),
        Arc::new(MemoryStorage::new()),
        config,
    )?;

    let mut holders = vec![owner];
    holders.extend(members);
    let phase1 = {
        let tx = chain.begin(owner).await;
        match vote_times {
            Some((membership, supermajority)) => {
                kit.begin_provisioning_with_vote_times(tx.ctx(), &holders, membership, supermajority)
                    .await?
            }
            None => kit.begin_provisioning(tx.ctx(), &holders).await?,
        }
    };

    let council = if council.is_empty() { vec![owner] } else { council };
    let phase2 = {
        let tx = chain.begin(owner).await;
        kit.complete_provisioning(
            tx.ctx(),
            phase1.organization,
            phase1.membership_voting,
            phase1.supermajority_voting,
            &council,
            &phase1.continuation,
        )
        .await?
    };

    if treasury > 0 {
        let Some(org) = kit.organization(phase1.organization).await else {
            bail!("organization {} disappeared", phase1.organization);
        };
        let Some(finance) = org.app_as::<Finance>(phase1.finance).await else {
            bail!("finance app {} not found", phase1.finance);
        };
        let amount = treasury.checked_mul(TOKEN_UNIT).context("treasury amount overflows")?;
        chain.bank().credit(owner, amount).await?;
        let tx = chain.begin(owner).await;
        finance.deposit(tx.ctx(), amount, "initial treasury").await?;
        info!(amount = treasury, "Treasury funded");
    }

    Ok(Deployment {
        initiator: owner,
        phase1,
        phase2,
    })
}
