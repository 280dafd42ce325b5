use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::learner::PaxosLearner;
use crate::proposal::Slot;
use crate::proposer::Proposer;
use crate::retry::RetryPolicy;

/// Start timestamp to commit timestamp mapping agreed through consensus.
///
/// Each start timestamp is its own slot, which gives put-if-absent semantics:
/// the first commit timestamp chosen for a transaction is final.
pub struct PaxosTransactionService {
    proposer: Arc<Proposer>,
    learner: Arc<dyn PaxosLearner>,
    retry: RetryPolicy,
    commits: RwLock<HashMap<u64, u64>>,
}

impl PaxosTransactionService {
    /// `learner` should be one that `proposer` notifies.
    pub fn new(
        proposer: Arc<Proposer>,
        learner: Arc<dyn PaxosLearner>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            proposer,
            learner,
            retry,
            commits: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, start_ts: u64) -> Result<Option<u64>> {
        if let Some(commit_ts) = self.cached(start_ts) {
            return Ok(Some(commit_ts));
        }
        let slot = Slot::new(start_ts);
        match self.learner.get_learned_value(slot).await? {
            Some(value) => {
                let commit_ts = decode(slot, value.payload())?;
                self.cache(start_ts, commit_ts);
                Ok(Some(commit_ts))
            }
            None => Ok(None),
        }
    }

    pub async fn get_many(
        &self,
        start_timestamps: impl IntoIterator<Item = u64>,
    ) -> Result<HashMap<u64, u64>> {
        let mut found = HashMap::new();
        for start_ts in start_timestamps {
            if let Some(commit_ts) = self.get(start_ts).await? {
                found.insert(start_ts, commit_ts);
            }
        }
        Ok(found)
    }

    /// Record `commit_ts` for `start_ts` unless some other value already won.
    ///
    /// Fails with [`Error::KeyAlreadyExists`] carrying the winning value, or
    /// with [`Error::ServiceUnavailable`] once retries are exhausted.
    pub async fn put_unless_exists(&self, start_ts: u64, commit_ts: u64) -> Result<()> {
        let slot = Slot::new(start_ts);
        let proposed = commit_ts.to_be_bytes().to_vec();

        let chosen = self
            .retry
            .run(|| {
                let proposer = Arc::clone(&self.proposer);
                let proposed = proposed.clone();
                async move { proposer.propose(slot, proposed).await }
            })
            .await?;
        let final_ts = decode(slot, &chosen)?;
        // before returning so a following get sees it
        self.cache(start_ts, final_ts);

        if final_ts != commit_ts {
            debug!(start_ts, commit_ts, final_ts, "commit timestamp already agreed");
            return Err(Error::KeyAlreadyExists {
                start_ts,
                commit_ts: final_ts,
            });
        }
        info!(start_ts, commit_ts, "committed");
        Ok(())
    }

    fn cached(&self, start_ts: u64) -> Option<u64> {
        let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
        commits.get(&start_ts).copied()
    }

    fn cache(&self, start_ts: u64, commit_ts: u64) {
        let mut commits = self.commits.write().unwrap_or_else(|e| e.into_inner());
        commits.entry(start_ts).or_insert(commit_ts);
    }
}

fn decode(slot: Slot, bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| Error::MalformedValue { slot })?;
    Ok(u64::from_be_bytes(bytes))
}
