use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::proposal::{ProposalValue, Slot};

#[async_trait]
pub trait PaxosLearner: Send + Sync {
    /// Record a chosen value. Learning the same decree twice is a no-op.
    async fn learn(&self, slot: Slot, value: ProposalValue) -> Result<()>;

    /// `None` only means this learner has not heard about `slot` yet.
    async fn get_learned_value(&self, slot: Slot) -> Result<Option<ProposalValue>>;

    async fn greatest_learned_value(&self) -> Result<Option<ProposalValue>>;

    /// Every learned value at or after `slot`, in slot order.
    async fn learned_values_since(&self, slot: Slot) -> Result<Vec<ProposalValue>>;
}

#[derive(Debug, Default)]
pub struct Learner {
    learned: RwLock<BTreeMap<Slot, ProposalValue>>,
}

impl Learner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, slot: Slot, value: ProposalValue) -> Result<()> {
        if value.sequence() != slot {
            error!(%slot, sequence = %value.sequence(), "value learned under the wrong slot");
            return Err(Error::LearnerConflict { slot });
        }

        let mut learned = self.learned.write().unwrap_or_else(|e| e.into_inner());
        match learned.get(&slot) {
            Some(existing) if existing.same_decree(&value) => Ok(()),
            Some(existing) => {
                error!(
                    %slot,
                    existing = %existing.proposal_id(),
                    incoming = %value.proposal_id(),
                    "two different values learned for one slot"
                );
                Err(Error::LearnerConflict { slot })
            }
            None => {
                debug!(%slot, proposal = %value.proposal_id(), "learned value");
                learned.insert(slot, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, slot: Slot) -> Option<ProposalValue> {
        let learned = self.learned.read().unwrap_or_else(|e| e.into_inner());
        learned.get(&slot).cloned()
    }

    pub fn greatest(&self) -> Option<ProposalValue> {
        let learned = self.learned.read().unwrap_or_else(|e| e.into_inner());
        learned.values().next_back().cloned()
    }

    pub fn since(&self, slot: Slot) -> Vec<ProposalValue> {
        let learned = self.learned.read().unwrap_or_else(|e| e.into_inner());
        learned.range(slot..).map(|(_, value)| value.clone()).collect()
    }
}

#[async_trait]
impl PaxosLearner for Learner {
    async fn learn(&self, slot: Slot, value: ProposalValue) -> Result<()> {
        self.record(slot, value)
    }

    async fn get_learned_value(&self, slot: Slot) -> Result<Option<ProposalValue>> {
        Ok(self.get(slot))
    }

    async fn greatest_learned_value(&self) -> Result<Option<ProposalValue>> {
        Ok(self.greatest())
    }

    async fn learned_values_since(&self, slot: Slot) -> Result<Vec<ProposalValue>> {
        Ok(self.since(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::ProposalId;

    fn value(round: u64, slot: u64, payload: &str) -> ProposalValue {
        ProposalValue::new(
            ProposalId::new(round, "node".into()),
            Slot::new(slot),
            payload.as_bytes().to_vec(),
        )
    }

    #[test]
    fn unknown_slot_is_absent() {
        let learner = Learner::new();
        assert!(learner.get(Slot::new(1)).is_none());
        assert!(learner.greatest().is_none());
    }

    #[test]
    fn relearning_the_same_decree_is_idempotent() {
        let learner = Learner::new();
        learner.record(Slot::new(1), value(1, 1, "a")).unwrap();
        learner.record(Slot::new(1), value(1, 1, "a")).unwrap();
        // adopted under a later round
        learner.record(Slot::new(1), value(5, 1, "a")).unwrap();

        assert_eq!(learner.get(Slot::new(1)), Some(value(1, 1, "a")));
    }

    #[test]
    fn conflicting_value_is_rejected_and_not_overwritten() {
        let learner = Learner::new();
        learner.record(Slot::new(1), value(1, 1, "a")).unwrap();

        let err = learner.record(Slot::new(1), value(2, 1, "b")).unwrap_err();
        assert!(matches!(err, Error::LearnerConflict { slot } if slot == Slot::new(1)));
        assert_eq!(learner.get(Slot::new(1)), Some(value(1, 1, "a")));
    }

    #[test]
    fn value_for_another_slot_is_rejected() {
        let learner = Learner::new();
        assert!(learner.record(Slot::new(1), value(1, 2, "a")).is_err());
        assert!(learner.get(Slot::new(1)).is_none());
    }

    #[tokio::test]
    async fn greatest_and_since() {
        let learner = Learner::new();
        for slot in [3, 1, 7, 5] {
            learner
                .learn(Slot::new(slot), value(1, slot, &slot.to_string()))
                .await
                .unwrap();
        }

        let greatest = learner.greatest_learned_value().await.unwrap().unwrap();
        assert_eq!(greatest.sequence(), Slot::new(7));

        let since: Vec<_> = learner
            .learned_values_since(Slot::new(4))
            .await
            .unwrap()
            .into_iter()
            .map(|value| value.sequence().sequence())
            .collect();
        assert_eq!(since, vec![5, 7]);
    }
}
