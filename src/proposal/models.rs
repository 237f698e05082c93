//! Proposal data models
//!
//! Defines the structure for proposed changes to a collection.

use crate::auth::Principal;
use crate::external::NewDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ProposalId = u64;

/// Proposal status in the governance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Open for votes
    Active,
    /// Approval condition met, waiting for execution
    Approved,
    Rejected,
    /// Effect applied
    Executed,
    /// Voting window closed without approval
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalStatus::Executed | ProposalStatus::Rejected | ProposalStatus::Expired
        )
    }

    /// Forward-only transition table
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Active, Approved) | (Active, Rejected) | (Active, Expired) | (Approved, Executed)
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProposalStatus::Active => "active",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Executed => "executed",
            ProposalStatus::Expired => "expired",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProposalStatus::Active),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "executed" => Ok(ProposalStatus::Executed),
            "expired" => Ok(ProposalStatus::Expired),
            other => Err(format!("unknown proposal status '{}'", other)),
        }
    }
}

/// The change a proposal would apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProposalType {
    /// Add new documents to the index and embed them
    EmbedDocument { documents: Vec<NewDocument> },
    /// Embed documents already staged in the index
    BatchEmbed { document_ids: Vec<String> },
    AddAdmin { principal: Principal },
    RemoveAdmin { principal: Principal },
    ChangeThreshold { value: u32 },
    UpdateQuorum { value: u32 },
    /// Hand collection ownership to another principal
    TransferGenesis { new_owner: Principal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVote {
    pub choice: VoteChoice,
    /// 1 for admin-counted models, token balance at vote time for token voting
    pub weight: u128,
    pub cast_at: DateTime<Utc>,
}

/// Outcome of one document in an embedding batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOutcome {
    /// Staged document id, or the title for documents submitted inline
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// What happened when an approved proposal was carried out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub executed_at: DateTime<Utc>,
    pub executed_by: Principal,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<DocumentOutcome>,
    /// Remote follow-up that failed without undoing the local effect
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }
}

/// A proposed change to a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub creator: Principal,
    pub description: String,
    pub proposal_type: ProposalType,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// One entry per voter, never overwritten
    pub votes: BTreeMap<Principal, CastVote>,
    /// Id of the mirrored proposal in the remote governance system
    pub external_id: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub executed_by: Option<Principal>,
    pub execution: Option<ExecutionReport>,
}

impl Proposal {
    pub fn new(
        id: ProposalId,
        creator: Principal,
        description: String,
        proposal_type: ProposalType,
        now: DateTime<Utc>,
        voting_window: chrono::Duration,
    ) -> Self {
        Self {
            id,
            creator,
            description,
            proposal_type,
            status: ProposalStatus::Active,
            created_at: now,
            expires_at: now + voting_window,
            updated_at: now,
            votes: BTreeMap::new(),
            external_id: None,
            executed_at: None,
            executed_by: None,
            execution: None,
        }
    }

    pub fn is_due_to_expire(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Active && now >= self.expires_at
    }

    /// Apply a status change, refusing anything but a forward transition
    pub fn transition(&mut self, next: ProposalStatus, now: DateTime<Utc>) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "proposal {} cannot move from {} to {}",
                self.id, self.status, next
            ));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn yes_count(&self) -> usize {
        self.votes
            .values()
            .filter(|v| v.choice == VoteChoice::Yes)
            .count()
    }

    pub fn weight_for(&self, choice: VoteChoice) -> u128 {
        self.votes
            .values()
            .filter(|v| v.choice == choice)
            .fold(0u128, |acc, v| acc.saturating_add(v.weight))
    }

    pub fn summary(&self) -> ProposalSummary {
        ProposalSummary {
            id: self.id,
            kind: self.proposal_type.kind(),
            description: self.description.clone(),
            creator: self.creator.clone(),
            status: self.status,
            vote_count: self.votes.len(),
            yes_weight: self.weight_for(VoteChoice::Yes),
            external_id: self.external_id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub id: ProposalId,
    pub kind: &'static str,
    pub description: String,
    pub creator: Principal,
    pub status: ProposalStatus,
    pub vote_count: usize,
    pub yes_weight: u128,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
