use derive_new::new;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An independent consensus instance.
#[derive(
    Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Serialize, Deserialize,
)]
pub struct Slot(u64);

impl Slot {
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub const fn sequence(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for Slot {
    fn from(sequence: u64) -> Self {
        Self(sequence)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot({})", self.0)
    }
}

/// Totally ordered proposal identifier.
///
/// Ordering compares `round` first and falls back to the proposer's
/// `tiebreaker`, so two ids are only equal when they come from the same
/// proposer in the same round. Field order matters for the derived `Ord`.
#[derive(
    Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, Getters, new,
)]
#[getset(get = "pub")]
pub struct ProposalId {
    #[getset(skip)]
    round: u64,
    tiebreaker: String,
}

impl ProposalId {
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The smallest id owned by `tiebreaker` that is strictly greater than
    /// `after_highest`, or `None` once the round space is used up.
    pub fn next(after_highest: &ProposalId, tiebreaker: impl Into<String>) -> Option<Self> {
        let tiebreaker = tiebreaker.into();
        if tiebreaker.as_str() > after_highest.tiebreaker.as_str() {
            Some(Self::new(after_highest.round, tiebreaker))
        } else {
            let round = after_highest.round.checked_add(1)?;
            Some(Self::new(round, tiebreaker))
        }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.round, self.tiebreaker)
    }
}

/// The data a proposer wants agreed upon, tagged with the id that produced it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Getters, new)]
#[getset(get = "pub")]
pub struct ProposalValue {
    proposal_id: ProposalId,
    #[getset(skip)]
    sequence: Slot,
    payload: Vec<u8>,
}

impl ProposalValue {
    /// Ordering key a learner uses to detect values proposed for another slot.
    pub fn sequence(&self) -> Slot {
        self.sequence
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Whether two values carry the same agreed data, ignoring which round
    /// delivered them.
    pub fn same_decree(&self, other: &ProposalValue) -> bool {
        self.sequence == other.sequence && self.payload == other.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn orders_by_round_then_tiebreaker() {
        let a1 = ProposalId::new(1, "a".to_string());
        let b1 = ProposalId::new(1, "b".to_string());
        let a2 = ProposalId::new(2, "a".to_string());

        assert_eq!(a1.cmp(&b1), Ordering::Less);
        assert_eq!(b1.cmp(&a2), Ordering::Less);
        assert_eq!(a1.cmp(&a1.clone()), Ordering::Equal);
        assert_ne!(a1, ProposalId::new(1, "c".to_string()));
    }

    #[test]
    fn next_is_strictly_greater() {
        let high = ProposalId::new(7, "m".to_string());

        let bigger_tiebreaker = ProposalId::next(&high, "z").unwrap();
        assert_eq!(bigger_tiebreaker.round(), 7);
        assert!(bigger_tiebreaker > high);

        let smaller_tiebreaker = ProposalId::next(&high, "a").unwrap();
        assert_eq!(smaller_tiebreaker.round(), 8);
        assert!(smaller_tiebreaker > high);

        let same = ProposalId::next(&high, "m").unwrap();
        assert_eq!(same, ProposalId::new(8, "m".to_string()));
    }

    #[test]
    fn next_at_last_round() {
        let last = ProposalId::new(u64::MAX, "m".to_string());

        assert_eq!(
            ProposalId::next(&last, "z"),
            Some(ProposalId::new(u64::MAX, "z".to_string()))
        );
        assert_eq!(ProposalId::next(&last, "a"), None);
        assert_eq!(ProposalId::next(&last, "m"), None);
    }

    #[test]
    fn same_decree_ignores_proposal_id() {
        let first =
            ProposalValue::new(ProposalId::new(1, "a".into()), Slot::new(3), b"v".to_vec());
        let readopted =
            ProposalValue::new(ProposalId::new(4, "b".into()), Slot::new(3), b"v".to_vec());
        let other_slot =
            ProposalValue::new(ProposalId::new(1, "a".into()), Slot::new(4), b"v".to_vec());

        assert!(first.same_decree(&readopted));
        assert!(!first.same_decree(&other_slot));
    }

    #[test]
    fn slot_display() {
        assert_eq!(Slot::new(42).to_string(), "slot(42)");
        assert_eq!(Slot::new(1).next(), Slot::new(2));
    }
}
