use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::message::{AcceptResponse, Promise};
use crate::proposal::{ProposalId, ProposalValue, Slot};
use crate::storage::{AcceptorRecord, AcceptorStore};

/// The acceptor side of the protocol, as seen by a proposer.
///
/// Implementations may sit behind any transport. An `Err` means the call did
/// not complete (unreachable peer, failed write); a stale proposal is an `Ok`
/// response with `accepted == false`.
#[async_trait]
pub trait PaxosAcceptor: Send + Sync {
    async fn prepare(&self, slot: Slot, proposal_id: ProposalId) -> Result<Promise>;

    async fn accept(&self, slot: Slot, proposal: ProposalValue) -> Result<AcceptResponse>;
}

#[derive(Default)]
struct SlotState {
    loaded: bool,
    record: Option<AcceptorRecord>,
}

impl SlotState {
    fn current<S>(&mut self, store: &S, slot: Slot) -> Result<Option<&AcceptorRecord>>
    where
        S: AcceptorStore + ?Sized,
    {
        if !self.loaded {
            self.record = store.load(slot)?;
            self.loaded = true;
        }
        Ok(self.record.as_ref())
    }

    fn prepare<S>(&mut self, store: &S, slot: Slot, proposal_id: ProposalId) -> Result<Promise>
    where
        S: AcceptorStore + ?Sized,
    {
        let current = self.current(store, slot)?;

        if let Some(record) = current {
            if proposal_id <= record.promised_id {
                debug!(
                    %slot,
                    candidate = %proposal_id,
                    promised = %record.promised_id,
                    "rejecting prepare"
                );
                return Ok(Promise::reject(record.promised_id.clone()));
            }
        }

        let prior = current.and_then(|record| record.accepted.clone());
        let updated = AcceptorRecord::new(proposal_id.clone(), prior.clone());
        persist(store, slot, &updated)?;
        self.record = Some(updated);

        debug!(%slot, promised = %proposal_id, has_prior = prior.is_some(), "promised");
        let prior_id = prior.as_ref().map(|value| value.proposal_id().clone());
        Ok(Promise::accept(proposal_id, prior_id, prior))
    }

    fn accept<S>(
        &mut self,
        store: &S,
        slot: Slot,
        proposal: ProposalValue,
    ) -> Result<AcceptResponse>
    where
        S: AcceptorStore + ?Sized,
    {
        if let Some(record) = self.current(store, slot)? {
            if proposal.proposal_id() < &record.promised_id {
                debug!(
                    %slot,
                    proposal = %proposal.proposal_id(),
                    promised = %record.promised_id,
                    "rejecting accept"
                );
                return Ok(AcceptResponse::new(false, record.promised_id.clone()));
            }
            if record.accepted.as_ref() == Some(&proposal) {
                return Ok(AcceptResponse::new(true, record.promised_id.clone()));
            }
        }

        let proposal_id = proposal.proposal_id().clone();
        let updated = AcceptorRecord::new(proposal_id.clone(), Some(proposal));
        persist(store, slot, &updated)?;
        self.record = Some(updated);

        debug!(%slot, accepted = %proposal_id, "accepted");
        Ok(AcceptResponse::new(true, proposal_id))
    }
}

fn persist<S>(store: &S, slot: Slot, record: &AcceptorRecord) -> Result<()>
where
    S: AcceptorStore + ?Sized,
{
    store.store(slot, record).inspect_err(|err| {
        error!(%slot, promised = %record.promised_id, %err, "acceptor failed to persist state");
    })
}

/// A durable acceptor.
///
/// Calls for one slot are serialized on that slot's lock; different slots
/// proceed independently. Store reads and writes run on the blocking pool
/// while the slot lock is held, and finish even when the caller stops
/// waiting, so the cached record never lags the durable one.
pub struct Acceptor<S> {
    store: Arc<S>,
    slots: Mutex<HashMap<Slot, Arc<tokio::sync::Mutex<SlotState>>>>,
}

impl<S: AcceptorStore + 'static> Acceptor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn lock(&self, slot: Slot) -> OwnedMutexGuard<SlotState> {
        let cell = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(slot).or_default())
        };
        cell.lock_owned().await
    }

    async fn with_slot<T, F>(&self, slot: Slot, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SlotState, &S) -> Result<T> + Send + 'static,
    {
        let mut state = self.lock(slot).await;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&mut *state, &*store))
            .await
            .map_err(|err| Error::Durability(format!("acceptor task for {slot} failed: {err}")))?
    }
}

#[async_trait]
impl<S: AcceptorStore + 'static> PaxosAcceptor for Acceptor<S> {
    async fn prepare(&self, slot: Slot, proposal_id: ProposalId) -> Result<Promise> {
        self.with_slot(slot, move |state, store| state.prepare(store, slot, proposal_id))
            .await
    }

    async fn accept(&self, slot: Slot, proposal: ProposalValue) -> Result<AcceptResponse> {
        self.with_slot(slot, move |state, store| state.accept(store, slot, proposal))
            .await
    }
}
