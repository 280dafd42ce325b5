use std::fmt;
use thiserror::Error;

use crate::proposal::Slot;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Prepare,
    Accept,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => f.write_str("prepare"),
            Phase::Accept => f.write_str("accept"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Quorum was not reached. Retry with a higher proposal id.
    #[error("{phase} round failed for {slot}: {accepted} of {required} acceptors agreed")]
    RoundFailure {
        slot: Slot,
        phase: Phase,
        accepted: usize,
        required: usize,
    },
    #[error("acceptor could not persist state: {0}")]
    Durability(String),
    #[error("learner already holds a different value for {slot}")]
    LearnerConflict { slot: Slot },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("key {start_ts} already exists and is mapped to {commit_ts}")]
    KeyAlreadyExists { start_ts: u64, commit_ts: u64 },
    #[error("agreed value for {slot} is malformed")]
    MalformedValue { slot: Slot },
    /// The proposer has used up its round space and can never win again.
    #[error("proposer {0} has no proposal rounds left")]
    RoundsExhausted(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_round_failure(&self) -> bool {
        matches!(self, Error::RoundFailure { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
