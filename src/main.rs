//! Schain Manager — network simulation
//!
//! Registers a set of nodes, places schains on them and runs a number of
//! reward epochs: monitors report verdicts, owners claim bounties and the
//! price follows load. The ledger is snapshotted to sled after each epoch
//! and a rerun resumes from the latest snapshot.

use chrono::{DateTime, Utc};
use clap::Parser;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use schain_manager::{
    ChaChaSeed, Custody, Directory, ErrorKind, InMemoryCustody, ManagerConfig, NodeParams, OwnerAccess,
    SchainManager, Storage, VerdictReport, SCHAINS_TREASURY,
};
use schain_manager::types::*;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const ADMIN: Address = [0xAD; 20];
const TREASURY: Address = [0x7E; 20];
const SCHAIN_OWNER: Address = [0xC0; 20];

#[derive(Parser)]
#[command(name = "schain-manager", version, about = "Schain Manager: network simulation")]
struct Args {
    /// JSON config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Nodes registered on a fresh ledger
    #[arg(short, long, default_value = "30")]
    nodes: u8,

    /// Reward epochs to simulate
    #[arg(short, long, default_value = "3")]
    epochs: u64,

    /// Schains created on a fresh ledger
    #[arg(long, default_value = "4")]
    schains: usize,

    /// Seed for group selection and simulated measurements
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Snapshots kept on disk
    #[arg(long, default_value = "10")]
    keep: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("schain_manager=info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match ManagerConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                return;
            }
        },
        None => ManagerConfig::default(),
    };

    info!("════════════════════════════════════════════════════════════");
    info!("  Schain Manager v{} — Network Simulation", VERSION);
    info!("════════════════════════════════════════════════════════════");

    let storage = match Storage::open(&args.data_dir) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open storage {}: {}", args.data_dir.display(), e);
            return;
        }
    };

    if let Err(e) = run(&args, config, &storage) {
        error!("Simulation stopped: {}", e);
    }
}

fn run(args: &Args, config: ManagerConfig, storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    let directory = Directory::new().with(SCHAINS_TREASURY, TREASURY);
    let access = Box::new(OwnerAccess::new(ADMIN));
    let seeds = Box::new(ChaChaSeed::from_seed(args.seed));
    let mut rng = ChaCha20Rng::seed_from_u64(args.seed ^ 0x5eed);

    let (mut height, mut manager, mut now) = match storage.latest()? {
        Some((height, ledger)) => {
            let now = ledger
                .nodes
                .iter()
                .map(|n| n.last_reward_date)
                .max()
                .unwrap_or(0)
                .max(ledger.pricing.last_updated());
            info!("Resuming from snapshot {} ({} nodes)", height, ledger.nodes.len());
            let manager = SchainManager::with_ledger(
                config,
                ledger,
                InMemoryCustody::new(),
                Box::new(directory),
                access,
                seeds,
            )?;
            (height, manager, now)
        }
        None => {
            let now = Utc::now().timestamp().max(0) as u64;
            let mut manager = SchainManager::new(
                config,
                InMemoryCustody::new(),
                Box::new(directory),
                access,
                seeds,
                now,
            )?;
            bootstrap(&mut manager, args, now)?;
            (0, manager, now)
        }
    };

    let reward_period = manager.config().reward_period;
    for _ in 0..args.epochs {
        now += reward_period;
        height += 1;
        info!("Epoch {} at {}", height, format_time(now));

        if height == 2 {
            retire_one(&mut manager, now);
        }
        report_verdicts(&mut manager, &mut rng, now);
        claim_bounties(&mut manager, now);

        match manager.adjust_price(now) {
            Ok(price) => info!("Price now {}", price),
            Err(e) if matches!(e.kind(), ErrorKind::Cooldown | ErrorKind::NoChange) => {
                debug!("Price unchanged: {}", e)
            }
            Err(e) => warn!("Price adjustment failed: {}", e),
        }

        let expired = manager.remove_expired_schains(now)?;
        if !expired.is_empty() {
            info!("{} schains expired", expired.len());
        }

        storage.save(height, manager.ledger())?;
        storage.prune(args.keep)?;

        info!(
            "Status: {} active nodes | {} schains | load {}% | emitted {}",
            manager.ledger().nodes.active_count(),
            manager.ledger().schains.len(),
            manager.load_percentage(),
            manager.ledger().bounty.emitted()
        );
    }

    info!("Treasury balance: {}", manager.custody().balance(&TREASURY));
    Ok(())
}

fn bootstrap(
    manager: &mut SchainManager<InMemoryCustody>,
    args: &Args,
    now: Timestamp,
) -> Result<(), Box<dyn std::error::Error>> {
    for i in 0..args.nodes {
        let owner = node_owner(i);
        let ip = Ipv4Addr::new(10, 0, i / 16, i % 16 + 1);
        manager.create_node(
            &owner,
            NodeParams {
                name: format!("node-{}", i),
                owner,
                ip,
                public_ip: ip,
                port: 10000,
                public_key: owner.to_vec(),
            },
            now,
        )?;
    }
    manager.init_nodes(&ADMIN)?;
    info!("{} nodes registered", args.nodes);

    let lifetime = manager.config().reward_period * args.epochs.max(1);
    let codes = [4u8, 5, 1, 2];
    for (i, code) in codes.iter().cycle().take(args.schains).enumerate() {
        let price = manager.schain_price(*code, lifetime)?;
        manager.custody_mut().credit(&SCHAIN_OWNER, price)?;
        let name = format!("schain-{}", i);
        match manager.create_schain(&SCHAIN_OWNER, &name, *code, lifetime, price, now) {
            Ok(_) => {}
            Err(e) => warn!("Schain {} not created: {}", name, e),
        }
    }
    Ok(())
}

fn report_verdicts(manager: &mut SchainManager<InMemoryCustody>, rng: &mut ChaCha20Rng, now: Timestamp) {
    let monitors: Vec<(NodeId, Address)> = manager
        .ledger()
        .nodes
        .iter()
        .filter(|n| n.is_active())
        .map(|n| (n.id, n.owner))
        .collect();

    for (monitor, owner) in monitors {
        let reports: Vec<VerdictReport> = manager
            .ledger()
            .monitors
            .checked_records(monitor)
            .iter()
            .filter(|r| r.is_open(now))
            .map(|r| VerdictReport {
                to_node: r.monitored,
                downtime: if rng.next_u32() % 10 == 0 { 1 } else { 0 },
                latency: 1000 + rng.next_u64() % 200_000,
            })
            .collect();
        if reports.is_empty() {
            continue;
        }
        if let Err(e) = manager.send_verdicts(&owner, monitor, &reports, now) {
            warn!("Verdicts from node {} rejected: {}", monitor, e);
        }
    }
}

fn claim_bounties(manager: &mut SchainManager<InMemoryCustody>, now: Timestamp) {
    let claimants: Vec<(NodeId, Address)> = manager
        .ledger()
        .nodes
        .iter()
        .filter(|n| n.is_active())
        .map(|n| (n.id, n.owner))
        .collect();

    for (node, owner) in claimants {
        match manager.get_bounty(&owner, node, now) {
            Ok(amount) => debug!("Node {} earned {}", node, amount),
            Err(e) => warn!("Bounty for node {} refused: {}", node, e),
        }
    }
}

/// Walk the newest active node out of the network.
fn retire_one(manager: &mut SchainManager<InMemoryCustody>, now: Timestamp) {
    let Some((node, owner)) = manager
        .ledger()
        .nodes
        .iter()
        .filter(|n| n.is_active())
        .map(|n| (n.id, n.owner))
        .last()
    else {
        return;
    };
    match manager.node_exit(&owner, node, now) {
        Ok(status) => info!("Node {} exiting: {}", node, status),
        Err(e) => warn!("Node {} cannot exit: {}", node, e),
    }
}

fn node_owner(i: u8) -> Address {
    let mut owner = [0u8; 20];
    owner[0] = 0x01;
    owner[19] = i;
    owner
}

fn format_time(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
