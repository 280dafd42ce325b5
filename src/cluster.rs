//! In-process wiring of a whole cluster.
//!
//! Each node runs two independent key spaces, one for leadership generations
//! and one for commit timestamps, each with its own acceptor and learner.

use getset::Getters;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::acceptor::{Acceptor, PaxosAcceptor};
use crate::config::PaxosConfig;
use crate::error::Result;
use crate::leader::{LeaderPingService, LocalPeer};
use crate::learner::{Learner, PaxosLearner};
use crate::proposer::Proposer;
use crate::storage::{FileAcceptorStore, InMemoryAcceptorStore};
use crate::transaction::PaxosTransactionService;

const LEADERSHIP: &str = "leadership";
const TRANSACTIONS: &str = "transactions";

#[derive(Getters)]
#[getset(get = "pub")]
pub struct Node {
    uuid: String,
    leadership: Arc<LeaderPingService>,
    transactions: PaxosTransactionService,
}

pub struct LocalCluster {
    nodes: Vec<Node>,
}

impl LocalCluster {
    pub fn start(config: &PaxosConfig) -> Result<Self> {
        let quorum = config.quorum_calculator()?;

        let leadership_acceptors = acceptors(config, LEADERSHIP)?;
        let transaction_acceptors = acceptors(config, TRANSACTIONS)?;
        let leadership_learners = learners(config.nodes);
        let transaction_learners = learners(config.nodes);

        let mut nodes = Vec::with_capacity(config.nodes);
        for index in 0..config.nodes {
            let uuid = Uuid::new_v4().to_string();

            let proposer = Proposer::new(
                uuid.clone(),
                leadership_acceptors.clone(),
                as_dyn(&leadership_learners),
                quorum,
                config.rpc_timeout(),
            )?
            .with_round_floor(config.round_floor);
            let leadership = Arc::new(LeaderPingService::new(
                proposer,
                Arc::clone(&leadership_learners[index]),
                config.ping_timeout(),
            ));

            let proposer = Proposer::new(
                uuid.clone(),
                transaction_acceptors.clone(),
                as_dyn(&transaction_learners),
                quorum,
                config.rpc_timeout(),
            )?
            .with_round_floor(config.round_floor);
            let learner: Arc<dyn PaxosLearner> = transaction_learners[index].clone();
            let transactions =
                PaxosTransactionService::new(Arc::new(proposer), learner, config.retry);

            info!(node = index, %uuid, "node started");
            nodes.push(Node {
                uuid,
                leadership,
                transactions,
            });
        }

        for node in &nodes {
            for peer in nodes.iter().filter(|peer| peer.uuid != node.uuid) {
                node.leadership.add_peer(Arc::new(LocalPeer::new(&peer.leadership)));
            }
        }

        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The node that currently answers pings as leader, if any.
    pub fn leader(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.leadership.is_leader())
    }
}

fn acceptors(config: &PaxosConfig, space: &str) -> Result<Vec<Arc<dyn PaxosAcceptor>>> {
    (0..config.nodes)
        .map(|index| -> Result<Arc<dyn PaxosAcceptor>> {
            match &config.data_dir {
                Some(dir) => {
                    let path = dir.join(format!("node-{index}")).join(space);
                    let store = FileAcceptorStore::open(path)?;
                    Ok(Arc::new(Acceptor::new(store)))
                }
                None => Ok(Arc::new(Acceptor::new(InMemoryAcceptorStore::new()))),
            }
        })
        .collect()
}

fn learners(count: usize) -> Vec<Arc<Learner>> {
    (0..count).map(|_| Arc::new(Learner::new())).collect()
}

fn as_dyn(learners: &[Arc<Learner>]) -> Vec<Arc<dyn PaxosLearner>> {
    learners
        .iter()
        .map(|learner| Arc::clone(learner) as Arc<dyn PaxosLearner>)
        .collect()
}
