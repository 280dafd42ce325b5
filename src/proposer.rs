use futures::future::{BoxFuture, FutureExt};
use futures::stream::FuturesUnordered;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::acceptor::PaxosAcceptor;
use crate::error::{Error, Phase, Result};
use crate::learner::PaxosLearner;
use crate::message::{AcceptResponse, Promise};
use crate::proposal::{ProposalId, ProposalValue, Slot};
use crate::quorum::{collect_quorum, Quorum, QuorumCalculator};

/// Drives single-decree rounds against a fixed set of acceptors.
///
/// One proposer may run rounds for many slots concurrently. Rounds share a
/// single counter, so an id is never handed out twice.
pub struct Proposer {
    uuid: String,
    acceptors: Vec<Arc<dyn PaxosAcceptor>>,
    learners: Vec<Arc<dyn PaxosLearner>>,
    quorum: QuorumCalculator,
    rpc_timeout: Duration,
    next_round: AtomicU64,
}

impl Proposer {
    pub fn new(
        uuid: impl Into<String>,
        acceptors: Vec<Arc<dyn PaxosAcceptor>>,
        learners: Vec<Arc<dyn PaxosLearner>>,
        quorum: QuorumCalculator,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        if quorum.acceptors() != acceptors.len() {
            return Err(Error::InvalidConfig(format!(
                "quorum sized for {} acceptors but {} configured",
                quorum.acceptors(),
                acceptors.len()
            )));
        }
        Ok(Self {
            uuid: uuid.into(),
            acceptors,
            learners,
            quorum,
            rpc_timeout,
            next_round: AtomicU64::new(0),
        })
    }

    /// First round this proposer will use.
    pub fn with_round_floor(self, floor: u64) -> Self {
        self.next_round.store(floor, Ordering::SeqCst);
        self
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn quorum(&self) -> &QuorumCalculator {
        &self.quorum
    }

    /// Round `u64::MAX` is never handed out; reaching it means the proposer
    /// is exhausted.
    fn next_proposal_id(&self) -> Result<ProposalId> {
        let round = self
            .next_round
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |round| round.checked_add(1))
            .map_err(|_| Error::RoundsExhausted(self.uuid.clone()))?;
        Ok(ProposalId::new(round, self.uuid.clone()))
    }

    /// Make sure the next id handed out is greater than `seen`.
    fn fast_forward(&self, seen: &ProposalId) {
        let floor = ProposalId::next(seen, self.uuid.as_str()).map_or(u64::MAX, |id| id.round());
        self.next_round.fetch_max(floor, Ordering::SeqCst);
    }

    /// Agree on a value for `slot`.
    ///
    /// The returned payload is whatever the acceptors chose. It differs from
    /// `value` when another proposer's value was already accepted for the
    /// slot. Fails with [`Error::RoundFailure`] when a quorum could not be
    /// assembled; retrying is up to the caller.
    pub async fn propose(&self, slot: Slot, value: Vec<u8>) -> Result<Vec<u8>> {
        self.propose_value(slot, value)
            .await
            .map(ProposalValue::into_payload)
    }

    /// Like [`Proposer::propose`], keeping the id the value was chosen under.
    #[instrument(skip(self, value), fields(proposer = %self.uuid))]
    pub async fn propose_value(&self, slot: Slot, value: Vec<u8>) -> Result<ProposalValue> {
        let proposal_id = self.next_proposal_id()?;
        debug!(%proposal_id, "starting round");

        let promises = self.prepare_stage(slot, &proposal_id).await?;
        let resolved = resolve_value(&promises, value);
        let proposal = ProposalValue::new(proposal_id, slot, resolved);

        self.accept_stage(slot, &proposal).await?;
        info!(proposal_id = %proposal.proposal_id(), "value chosen");

        self.notify_learners(slot, &proposal);
        Ok(proposal)
    }

    async fn prepare_stage(&self, slot: Slot, proposal_id: &ProposalId) -> Result<Vec<Promise>> {
        let required = self.quorum.prepare_quorum();
        let responses = self.broadcast(Phase::Prepare, |acceptor| {
            let proposal_id = proposal_id.clone();
            async move { acceptor.prepare(slot, proposal_id).await }.boxed()
        });
        let tally = collect_quorum(
            responses,
            self.acceptors.len(),
            required,
            Promise::is_accepted,
        )
        .await;

        for rejection in &tally.rejected {
            self.fast_forward(rejection.proposal_id());
        }

        if !tally.reached(required) {
            warn!(
                %slot,
                %proposal_id,
                promised = tally.affirmative.len(),
                rejected = tally.rejected.len(),
                unreachable = tally.unreachable,
                required,
                "prepare quorum not reached"
            );
            return Err(Error::RoundFailure {
                slot,
                phase: Phase::Prepare,
                accepted: tally.affirmative.len(),
                required,
            });
        }

        Ok(tally.affirmative)
    }

    async fn accept_stage(&self, slot: Slot, proposal: &ProposalValue) -> Result<()> {
        let required = self.quorum.accept_quorum();
        let responses = self.broadcast(Phase::Accept, |acceptor| {
            let proposal = proposal.clone();
            async move { acceptor.accept(slot, proposal).await }.boxed()
        });
        let tally = collect_quorum(
            responses,
            self.acceptors.len(),
            required,
            AcceptResponse::is_accepted,
        )
        .await;

        for rejection in &tally.rejected {
            self.fast_forward(rejection.promised_id());
        }

        if !tally.reached(required) {
            warn!(
                %slot,
                proposal_id = %proposal.proposal_id(),
                accepted = tally.affirmative.len(),
                rejected = tally.rejected.len(),
                unreachable = tally.unreachable,
                required,
                "accept quorum not reached"
            );
            return Err(Error::RoundFailure {
                slot,
                phase: Phase::Accept,
                accepted: tally.affirmative.len(),
                required,
            });
        }

        Ok(())
    }

    /// Issue one call per acceptor, each bounded by the RPC timeout, and
    /// yield results in completion order. A timeout counts as no response.
    fn broadcast<'a, T, F>(
        &'a self,
        phase: Phase,
        call: F,
    ) -> FuturesUnordered<BoxFuture<'a, Result<T>>>
    where
        T: Debug + Send + 'a,
        F: Fn(Arc<dyn PaxosAcceptor>) -> BoxFuture<'a, Result<T>>,
    {
        let timeout = self.rpc_timeout;
        self.acceptors
            .iter()
            .enumerate()
            .map(|(index, acceptor)| {
                let response = call(Arc::clone(acceptor));
                async move {
                    let result = match tokio::time::timeout(timeout, response).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Transport(format!(
                            "{phase} timed out after {timeout:?}"
                        ))),
                    };
                    match &result {
                        Ok(response) => debug!(acceptor = index, %phase, ?response, "response"),
                        Err(err) => debug!(acceptor = index, %phase, %err, "no response"),
                    }
                    result
                }
                .boxed()
            })
            .collect()
    }

    /// Best effort. Never blocks or fails the caller.
    fn notify_learners(&self, slot: Slot, proposal: &ProposalValue) {
        for learner in &self.learners {
            let learner = Arc::clone(learner);
            let proposal = proposal.clone();
            let timeout = self.rpc_timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, learner.learn(slot, proposal)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(%slot, %err, "learner rejected chosen value"),
                    Err(_) => warn!(%slot, "learner notification timed out"),
                }
            });
        }
    }
}

/// The value a round must propose given the promises of its prepare quorum.
///
/// If any promise reports a previously accepted value, the one accepted under
/// the highest proposal id wins; only otherwise may the proposer use its own.
pub fn resolve_value(promises: &[Promise], own: Vec<u8>) -> Vec<u8> {
    promises
        .iter()
        .filter(|promise| promise.is_accepted())
        .filter_map(|promise| {
            promise
                .prior_accepted_id()
                .as_ref()
                .zip(promise.prior_accepted_value().as_ref())
        })
        .max_by_key(|(accepted_id, _)| *accepted_id)
        .map(|(_, value)| value.payload().clone())
        .unwrap_or(own)
}
