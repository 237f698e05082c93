//! Proposal storage
//!
//! Per-collection proposal book. Ids come from a monotonic counter and
//! records are never removed, so terminal proposals stay available for audit.

use crate::error::AppError;
use crate::proposal::{Proposal, ProposalId, ProposalStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStore {
    next_id: ProposalId,
    proposals: BTreeMap<ProposalId, Proposal>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next proposal id
    pub fn allocate_id(&mut self) -> ProposalId {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert(&mut self, proposal: Proposal) -> Result<(), AppError> {
        if self.proposals.contains_key(&proposal.id) {
            return Err(AppError::Internal(format!(
                "Proposal id {} allocated twice",
                proposal.id
            )));
        }
        self.proposals.insert(proposal.id, proposal);
        Ok(())
    }

    /// Get a proposal by ID
    pub fn get(&self, id: ProposalId) -> Result<&Proposal, AppError> {
        self.proposals
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))
    }

    pub fn get_mut(&mut self, id: ProposalId) -> Result<&mut Proposal, AppError> {
        self.proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))
    }

    /// List proposals oldest first, optionally filtered by status
    pub fn list(&self, status: Option<ProposalStatus>) -> Vec<&Proposal> {
        self.proposals
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect()
    }

    pub fn has_due_expiry(&self, now: DateTime<Utc>) -> bool {
        self.proposals.values().any(|p| p.is_due_to_expire(now))
    }

    /// Move every overdue Active proposal to Expired, returning their ids
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<ProposalId> {
        let mut expired = Vec::new();
        for proposal in self.proposals.values_mut() {
            if proposal.is_due_to_expire(now)
                && proposal.transition(ProposalStatus::Expired, now).is_ok()
            {
                expired.push(proposal.id);
            }
        }
        expired
    }

    /// Get proposal count
    pub fn count(&self) -> usize {
        self.proposals.len()
    }
}
