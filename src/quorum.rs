use futures::{Stream, StreamExt};
use getset::CopyGetters;

use crate::error::{Error, Result};

pub trait Quorum {
    fn prepare_quorum(&self) -> usize;
    fn accept_quorum(&self) -> usize;
}

/// Phase thresholds for a fixed set of acceptors.
///
/// Two prepare quorums must always share an acceptor, and every accept
/// quorum must share one with every prepare quorum.
#[derive(Copy, Clone, Debug, Eq, PartialEq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct QuorumCalculator {
    acceptors: usize,
    phase1: usize,
    phase2: usize,
}

impl QuorumCalculator {
    pub fn new(acceptors: usize, phase1: usize, phase2: usize) -> Result<Self> {
        if acceptors == 0 {
            return Err(Error::InvalidConfig("no acceptors configured".into()));
        }
        if phase1 == 0 || phase2 == 0 || phase1 > acceptors || phase2 > acceptors {
            return Err(Error::InvalidConfig(format!(
                "quorum thresholds {phase1}/{phase2} out of range for {acceptors} acceptors"
            )));
        }
        if 2 * phase1 <= acceptors {
            return Err(Error::InvalidConfig(format!(
                "prepare quorum {phase1} does not intersect itself over {acceptors} acceptors"
            )));
        }
        if phase1 + phase2 <= acceptors {
            return Err(Error::InvalidConfig(format!(
                "prepare quorum {phase1} and accept quorum {phase2} \
                 do not intersect over {acceptors} acceptors"
            )));
        }
        Ok(Self {
            acceptors,
            phase1,
            phase2,
        })
    }

    /// `ceil((n + 1) / 2)` for both phases.
    pub fn majority(acceptors: usize) -> Result<Self> {
        let majority = acceptors / 2 + 1;
        Self::new(acceptors, majority, majority)
    }
}

impl Quorum for QuorumCalculator {
    fn prepare_quorum(&self) -> usize {
        self.phase1
    }

    fn accept_quorum(&self) -> usize {
        self.phase2
    }
}

/// Responses gathered until a quorum was decided either way.
#[derive(Debug)]
pub struct Tally<T> {
    pub affirmative: Vec<T>,
    pub rejected: Vec<T>,
    pub unreachable: usize,
}

impl<T> Tally<T> {
    pub fn reached(&self, required: usize) -> bool {
        self.affirmative.len() >= required
    }
}

/// Drain `responses` until `required` affirmative answers arrived or so many
/// rejections and failures arrived that `required` can no longer be reached.
///
/// Whatever is still in flight at that point is dropped, not awaited.
pub async fn collect_quorum<S, T, E, F>(
    responses: S,
    total: usize,
    required: usize,
    is_affirmative: F,
) -> Tally<T>
where
    S: Stream<Item = std::result::Result<T, E>>,
    F: Fn(&T) -> bool,
{
    let mut tally = Tally {
        affirmative: Vec::with_capacity(required),
        rejected: Vec::new(),
        unreachable: 0,
    };
    let slack = total.saturating_sub(required);
    let mut responses = std::pin::pin!(responses);

    while tally.affirmative.len() < required && tally.rejected.len() + tally.unreachable <= slack
    {
        match responses.next().await {
            Some(Ok(response)) if is_affirmative(&response) => tally.affirmative.push(response),
            Some(Ok(response)) => tally.rejected.push(response),
            Some(Err(_)) => tally.unreachable += 1,
            None => break,
        }
    }

    tally
}
