pub mod acceptor;
pub mod cluster;
pub mod config;
pub mod error;
pub mod leader;
pub mod learner;
pub mod message;
pub mod proposal;
pub mod proposer;
pub mod quorum;
pub mod retry;
pub mod storage;
pub mod telemetry;
pub mod transaction;

pub use acceptor::{Acceptor, PaxosAcceptor};
pub use config::PaxosConfig;
pub use error::{Error, Phase, Result};
pub use leader::{LeaderPingService, LeadershipState, PingableLeader};
pub use learner::{Learner, PaxosLearner};
pub use message::{AcceptResponse, Promise};
pub use proposal::{ProposalId, ProposalValue, Slot};
pub use proposer::Proposer;
pub use quorum::{Quorum, QuorumCalculator};
pub use retry::RetryPolicy;
pub use storage::{AcceptorStore, FileAcceptorStore, InMemoryAcceptorStore};
pub use transaction::PaxosTransactionService;
