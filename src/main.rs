//! Runs an in-process cluster: elects a leader and commits a few transactions.

use std::path::PathBuf;

use clap::Parser;
use futures::future::join_all;
use tracing::{error, info, warn};

use paxos_slot::cluster::LocalCluster;
use paxos_slot::{telemetry, Error, LeadershipState, PaxosConfig};

#[derive(Parser, Debug)]
#[command(name = "paxos-slot")]
#[command(about = "Run a local slot consensus cluster")]
struct Args {
    /// JSON configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of nodes from the configuration
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Start timestamps to commit
    #[arg(short, long, default_value_t = 5)]
    transactions: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PaxosConfig::load_from_file(path)?,
        None => PaxosConfig::default(),
    };
    if let Some(nodes) = args.nodes {
        config.nodes = nodes;
        config.quorum = None;
    }
    info!(nodes = config.nodes, data_dir = ?config.data_dir, "starting cluster");

    let cluster = LocalCluster::start(&config)?;

    // every node competes, at most one generation winner per round
    let attempts = join_all(
        cluster
            .nodes()
            .iter()
            .map(|node| node.leadership().acquire_leadership(&config.retry)),
    )
    .await;
    for (node, attempt) in cluster.nodes().iter().zip(attempts) {
        match attempt {
            Ok(LeadershipState::Leading) => info!(uuid = %node.uuid(), "leading"),
            Ok(state) => info!(uuid = %node.uuid(), ?state, "following"),
            Err(err) => warn!(uuid = %node.uuid(), %err, "leadership attempt failed"),
        }
    }

    let Some(leader) = cluster.leader() else {
        error!("no leader elected");
        return Err(Error::ServiceUnavailable("no leader elected".into()).into());
    };

    for start_ts in 1..=args.transactions {
        let commit_ts = start_ts + 1;
        match leader.transactions().put_unless_exists(start_ts, commit_ts).await {
            Ok(()) => info!(start_ts, commit_ts, "committed"),
            Err(Error::KeyAlreadyExists { commit_ts, .. }) => {
                info!(start_ts, commit_ts, "already committed")
            }
            Err(err) => return Err(err.into()),
        }
    }

    // a follower racing for a committed timestamp learns the agreed value
    if let Some(follower) = cluster.nodes().iter().find(|node| node.uuid() != leader.uuid()) {
        match follower.transactions().put_unless_exists(1, u64::MAX).await {
            Err(Error::KeyAlreadyExists { commit_ts, .. }) => {
                info!(uuid = %follower.uuid(), commit_ts, "follower sees agreed commit")
            }
            Ok(()) => info!(uuid = %follower.uuid(), "follower committed"),
            Err(err) => return Err(err.into()),
        }
    }

    let committed = leader.transactions().get_many(1..=args.transactions).await?;
    info!(committed = committed.len(), "done");
    Ok(())
}
