//! Leader liveness on top of slot consensus.
//!
//! Every leadership generation is its own slot in a dedicated key space; the
//! chosen payload is the UUID of the node that leads. A node leads while the
//! greatest generation its learner knows about names it.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::learner::Learner;
use crate::proposal::{ProposalValue, Slot};
use crate::proposer::Proposer;
use crate::retry::RetryPolicy;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LeadershipState {
    NotLeading,
    Attempting,
    Leading,
}

/// What peers can ask a leadership candidate.
#[async_trait]
pub trait PingableLeader: Send + Sync {
    /// Whether the remote node thinks it is the leader. Returning at all
    /// means the node is reachable.
    async fn ping(&self) -> Result<bool>;

    /// Stable for the lifetime of the remote process.
    async fn get_uuid(&self) -> Result<String>;
}

struct Peer {
    client: Arc<dyn PingableLeader>,
    uuid: Option<String>,
}

pub struct LeaderPingService {
    proposer: Proposer,
    learner: Arc<Learner>,
    peers: RwLock<Vec<Peer>>,
    ping_timeout: Duration,
    state: watch::Sender<LeadershipState>,
}

impl LeaderPingService {
    /// `learner` must be one of the learners `proposer` notifies, and this
    /// node's identity is the proposer's uuid.
    pub fn new(proposer: Proposer, learner: Arc<Learner>, ping_timeout: Duration) -> Self {
        let (state, _) = watch::channel(LeadershipState::NotLeading);
        Self {
            proposer,
            learner,
            peers: RwLock::new(Vec::new()),
            ping_timeout,
            state,
        }
    }

    pub fn add_peer(&self, client: Arc<dyn PingableLeader>) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.push(Peer { client, uuid: None });
    }

    pub fn uuid(&self) -> &str {
        self.proposer.uuid()
    }

    pub fn state(&self) -> LeadershipState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state.subscribe()
    }

    /// The leadership generation this node currently knows about.
    pub fn current_leader(&self) -> Option<(Slot, String)> {
        self.learner
            .greatest()
            .map(|value| (value.sequence(), leader_of(&value)))
    }

    /// Cheap local check, no consensus round.
    pub fn is_leader(&self) -> bool {
        let leading = self
            .current_leader()
            .is_some_and(|(_, leader)| leader == self.uuid());
        if !leading && self.state() == LeadershipState::Leading {
            info!(uuid = self.uuid(), "lost leadership to a newer generation");
            self.set_state(LeadershipState::NotLeading);
        }
        leading
    }

    fn set_state(&self, state: LeadershipState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(uuid = self.uuid(), ?previous, ?state, "leadership state changed");
        }
    }

    /// Ask every peer for its uuid and update the cache. Returns the indexes
    /// of peers whose uuid changed, which means they restarted.
    pub async fn refresh_peer_identities(&self) -> Vec<usize> {
        let clients: Vec<_> = {
            let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
            peers.iter().map(|peer| Arc::clone(&peer.client)).collect()
        };
        let answers = join_all(
            clients
                .iter()
                .map(|client| tokio::time::timeout(self.ping_timeout, client.get_uuid())),
        )
        .await;

        let mut restarted = Vec::new();
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        for (index, answer) in answers.into_iter().enumerate() {
            let Ok(Ok(uuid)) = answer else { continue };
            let Some(peer) = peers.get_mut(index) else { continue };
            if peer.uuid.as_ref().is_some_and(|known| *known != uuid) {
                warn!(peer = index, old = ?peer.uuid, new = %uuid, "peer restarted");
                restarted.push(index);
            }
            peer.uuid = Some(uuid);
        }
        restarted
    }

    fn peer_with_uuid(&self, uuid: &str) -> Option<Arc<dyn PingableLeader>> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .iter()
            .find(|peer| peer.uuid.as_deref() == Some(uuid))
            .map(|peer| Arc::clone(&peer.client))
    }

    /// Whether the node with `uuid` answers a ping claiming leadership.
    async fn leader_is_alive(&self, uuid: &str) -> bool {
        let mut peer = self.peer_with_uuid(uuid);
        if peer.is_none() {
            self.refresh_peer_identities().await;
            peer = self.peer_with_uuid(uuid);
        }
        let Some(peer) = peer else {
            debug!(leader = uuid, "no reachable peer carries the leader's uuid");
            return false;
        };

        match tokio::time::timeout(self.ping_timeout, peer.ping()).await {
            Ok(Ok(leading)) => leading,
            Ok(Err(err)) => {
                debug!(leader = uuid, %err, "leader ping failed");
                false
            }
            Err(_) => {
                debug!(leader = uuid, "leader ping timed out");
                false
            }
        }
    }

    /// One attempt at becoming leader.
    ///
    /// Returns `NotLeading` without running a round when another node answers
    /// pings as leader. A round failure is returned as an error after the
    /// state falls back to `NotLeading`.
    pub async fn try_acquire_leadership(&self) -> Result<LeadershipState> {
        if self.is_leader() {
            self.set_state(LeadershipState::Leading);
            return Ok(LeadershipState::Leading);
        }

        let known = self.current_leader();
        if let Some((generation, leader)) = &known {
            if self.leader_is_alive(leader).await {
                debug!(%generation, %leader, "current leader is alive");
                self.set_state(LeadershipState::NotLeading);
                return Ok(LeadershipState::NotLeading);
            }
        }

        let slot = known.map_or(Slot::new(0), |(generation, _)| generation.next());
        self.set_state(LeadershipState::Attempting);
        debug!(uuid = self.uuid(), %slot, "attempting to take leadership");

        let chosen = match self
            .proposer
            .propose_value(slot, self.uuid().as_bytes().to_vec())
            .await
        {
            Ok(chosen) => chosen,
            Err(err) => {
                self.set_state(LeadershipState::NotLeading);
                return Err(err);
            }
        };
        if let Err(err) = self.learner.record(slot, chosen.clone()) {
            self.set_state(LeadershipState::NotLeading);
            return Err(err);
        }

        let leader = leader_of(&chosen);
        if leader == self.uuid() {
            info!(uuid = self.uuid(), %slot, "became leader");
            self.set_state(LeadershipState::Leading);
            Ok(LeadershipState::Leading)
        } else {
            info!(uuid = self.uuid(), %slot, %leader, "another node won leadership");
            self.set_state(LeadershipState::NotLeading);
            Ok(LeadershipState::NotLeading)
        }
    }

    /// Retry [`LeaderPingService::try_acquire_leadership`] on round failures.
    pub async fn acquire_leadership(&self, policy: &RetryPolicy) -> Result<LeadershipState> {
        policy.run(move || self.try_acquire_leadership()).await
    }
}

#[async_trait]
impl PingableLeader for LeaderPingService {
    async fn ping(&self) -> Result<bool> {
        Ok(self.is_leader())
    }

    async fn get_uuid(&self) -> Result<String> {
        Ok(self.uuid().to_string())
    }
}

/// An in-process peer that disappears when its node is dropped.
pub struct LocalPeer(Weak<LeaderPingService>);

impl LocalPeer {
    pub fn new(service: &Arc<LeaderPingService>) -> Self {
        Self(Arc::downgrade(service))
    }

    fn service(&self) -> Result<Arc<LeaderPingService>> {
        self.0
            .upgrade()
            .ok_or_else(|| Error::Transport("peer is not running".into()))
    }
}

#[async_trait]
impl PingableLeader for LocalPeer {
    async fn ping(&self) -> Result<bool> {
        self.service()?.ping().await
    }

    async fn get_uuid(&self) -> Result<String> {
        self.service()?.get_uuid().await
    }
}

fn leader_of(value: &ProposalValue) -> String {
    String::from_utf8_lossy(value.payload()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::{Acceptor, PaxosAcceptor};
    use crate::learner::PaxosLearner;
    use crate::quorum::QuorumCalculator;
    use crate::storage::{AcceptorStore, InMemoryAcceptorStore};

    const TIMEOUT: Duration = Duration::from_millis(100);

    struct Fixed {
        uuid: String,
        leading: bool,
    }

    #[async_trait]
    impl PingableLeader for Fixed {
        async fn ping(&self) -> Result<bool> {
            Ok(self.leading)
        }

        async fn get_uuid(&self) -> Result<String> {
            Ok(self.uuid.clone())
        }
    }

    fn service(uuid: &str, acceptor: &Arc<Acceptor<InMemoryAcceptorStore>>) -> LeaderPingService {
        let learner = Arc::new(Learner::new());
        let acceptors: Vec<Arc<dyn PaxosAcceptor>> = vec![acceptor.clone()];
        let learners: Vec<Arc<dyn PaxosLearner>> = vec![learner.clone()];
        let proposer = Proposer::new(
            uuid,
            acceptors,
            learners,
            QuorumCalculator::majority(1).unwrap(),
            TIMEOUT,
        )
        .unwrap();
        LeaderPingService::new(proposer, learner, TIMEOUT)
    }

    #[tokio::test]
    async fn fresh_node_does_not_lead() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let node = service("node-a", &acceptor);

        assert!(!node.ping().await.unwrap());
        assert_eq!(node.get_uuid().await.unwrap(), "node-a");
        assert_eq!(node.state(), LeadershipState::NotLeading);
    }

    #[tokio::test]
    async fn uncontested_node_becomes_leader() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let node = service("node-a", &acceptor);
        let mut states = node.subscribe();

        let state = node.try_acquire_leadership().await.unwrap();
        assert_eq!(state, LeadershipState::Leading);
        assert!(node.ping().await.unwrap());
        assert_eq!(node.current_leader(), Some((Slot::new(0), "node-a".to_string())));
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), LeadershipState::Leading);

        // already leading: no new generation
        node.try_acquire_leadership().await.unwrap();
        assert_eq!(node.current_leader().unwrap().0, Slot::new(0));
    }

    #[tokio::test]
    async fn live_leader_is_left_alone() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let a = service("node-a", &acceptor);
        a.try_acquire_leadership().await.unwrap();

        let b = service("node-b", &acceptor);
        b.learner
            .record(Slot::new(0), a.learner.get(Slot::new(0)).unwrap())
            .unwrap();
        b.add_peer(Arc::new(Fixed {
            uuid: "node-a".into(),
            leading: true,
        }));

        assert_eq!(b.try_acquire_leadership().await.unwrap(), LeadershipState::NotLeading);
        assert!(acceptor.store().load(Slot::new(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_leader_is_replaced() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let a = service("node-a", &acceptor);
        a.try_acquire_leadership().await.unwrap();

        let b = service("node-b", &acceptor);
        b.learner
            .record(Slot::new(0), a.learner.get(Slot::new(0)).unwrap())
            .unwrap();

        assert_eq!(b.try_acquire_leadership().await.unwrap(), LeadershipState::Leading);
        assert_eq!(b.current_leader(), Some((Slot::new(1), "node-b".to_string())));
    }

    #[tokio::test]
    async fn lagging_node_adopts_the_chosen_leader() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let a = service("node-a", &acceptor);
        a.try_acquire_leadership().await.unwrap();

        // b has not learned generation 0 and proposes into it
        let b = service("node-b", &acceptor);
        assert_eq!(b.try_acquire_leadership().await.unwrap(), LeadershipState::NotLeading);
        assert_eq!(b.current_leader(), Some((Slot::new(0), "node-a".to_string())));
    }

    #[tokio::test]
    async fn restarted_peer_is_detected() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let node = Arc::new(service("node-a", &acceptor));
        let before = Arc::new(service("peer-1", &acceptor));
        node.add_peer(Arc::new(LocalPeer::new(&before)));

        assert!(node.refresh_peer_identities().await.is_empty());
        assert!(node.peer_with_uuid("peer-1").is_some());

        // same slot in the peer list now answers with a different identity
        let after = Arc::new(service("peer-1-restarted", &acceptor));
        {
            let mut peers = node.peers.write().unwrap();
            peers[0].client = Arc::new(LocalPeer::new(&after));
        }
        assert_eq!(node.refresh_peer_identities().await, vec![0]);
        assert!(node.peer_with_uuid("peer-1").is_none());
        drop(before);
    }

    #[tokio::test]
    async fn dropped_local_peer_is_unreachable() {
        let acceptor = Arc::new(Acceptor::new(InMemoryAcceptorStore::new()));
        let peer = Arc::new(service("node-a", &acceptor));
        let handle = LocalPeer::new(&peer);
        assert_eq!(handle.get_uuid().await.unwrap(), "node-a");

        drop(peer);
        assert!(matches!(handle.ping().await, Err(Error::Transport(_))));
    }
}
