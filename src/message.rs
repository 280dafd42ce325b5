use derive_new::new;
use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::proposal::{ProposalId, ProposalValue};

/// An acceptor's answer to `prepare`.
///
/// A rejecting promise carries the id the acceptor has already promised in
/// `proposal_id`, so the proposer can skip straight past it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Getters, new)]
#[getset(get = "pub")]
pub struct Promise {
    #[getset(skip)]
    accepted: bool,
    proposal_id: ProposalId,
    prior_accepted_id: Option<ProposalId>,
    prior_accepted_value: Option<ProposalValue>,
}

impl Promise {
    pub fn accept(
        proposal_id: ProposalId,
        prior_accepted_id: Option<ProposalId>,
        prior_accepted_value: Option<ProposalValue>,
    ) -> Self {
        Self::new(true, proposal_id, prior_accepted_id, prior_accepted_value)
    }

    pub fn reject(promised_id: ProposalId) -> Self {
        Self::new(false, promised_id, None, None)
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }
}

/// An acceptor's answer to `accept`.
///
/// `promised_id` is the acceptor's promise after handling the request; on a
/// rejection it is the higher id that caused it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Getters, new)]
#[getset(get = "pub")]
pub struct AcceptResponse {
    #[getset(skip)]
    accepted: bool,
    promised_id: ProposalId,
}

impl AcceptResponse {
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }
}
