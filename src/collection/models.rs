//! Collection data models

use crate::auth::Principal;
use crate::proposal::{ProposalStatus, ProposalStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

/// How a collection decides on proposals. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceModel {
    Permissionless,
    Multisig,
    TokenBased,
    SnsIntegrated,
}

impl std::fmt::Display for GovernanceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            GovernanceModel::Permissionless => "permissionless",
            GovernanceModel::Multisig => "multisig",
            GovernanceModel::TokenBased => "token_based",
            GovernanceModel::SnsIntegrated => "sns_integrated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetrics {
    pub document_count: u64,
    pub search_count: u64,
}

/// A governed document collection and everything it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Owner of the collection; only TransferGenesis changes it
    pub creator: Principal,
    pub admins: BTreeSet<Principal>,
    pub governance: GovernanceModel,
    /// Yes votes needed under Multisig
    pub threshold: u32,
    /// Percent of token supply needed under TokenBased
    pub quorum_threshold: u32,
    pub governance_token: Option<String>,
    pub sns_governance: Option<String>,
    /// Index holding this collection's documents in the embedding service
    pub index_id: String,
    pub metrics: CollectionMetrics,
    pub proposals: ProposalStore,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.admins.contains(principal)
    }

    /// Describe every broken invariant; empty when the record is sound
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.admins.is_empty() {
            violations.push("admin set is empty".to_string());
        }
        if self.threshold == 0 {
            violations.push("threshold is zero".to_string());
        }
        if self.governance == GovernanceModel::Multisig
            && self.threshold as usize > self.admins.len()
        {
            violations.push(format!(
                "threshold {} exceeds {} admins",
                self.threshold,
                self.admins.len()
            ));
        }
        if !(1..=100).contains(&self.quorum_threshold) {
            violations.push(format!("quorum {} outside 1..=100", self.quorum_threshold));
        }
        if self.governance_token.is_some() != (self.governance == GovernanceModel::TokenBased) {
            violations.push("governance token set for the wrong model".to_string());
        }
        if self.sns_governance.is_some() != (self.governance == GovernanceModel::SnsIntegrated) {
            violations.push("SNS governance reference set for the wrong model".to_string());
        }
        for proposal in self.proposals.list(None) {
            if proposal.external_id.is_some() && self.governance != GovernanceModel::SnsIntegrated {
                violations.push(format!("proposal {} linked outside SNS governance", proposal.id));
            }
            if proposal.status == ProposalStatus::Executed && proposal.executed_at.is_none() {
                violations.push(format!("proposal {} executed without a timestamp", proposal.id));
            }
        }

        violations
    }

    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            creator: self.creator.clone(),
            admins: self.admins.iter().cloned().collect(),
            governance: self.governance,
            threshold: self.threshold,
            quorum_threshold: self.quorum_threshold,
            governance_token: self.governance_token.clone(),
            sns_governance: self.sns_governance.clone(),
            metrics: self.metrics,
            proposal_count: self.proposals.count(),
            active_proposals: self.proposals.list(Some(ProposalStatus::Active)).len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Collection without its proposal book, as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub creator: Principal,
    pub admins: Vec<Principal>,
    pub governance: GovernanceModel,
    pub threshold: u32,
    pub quorum_threshold: u32,
    pub governance_token: Option<String>,
    pub sns_governance: Option<String>,
    pub metrics: CollectionMetrics,
    pub proposal_count: usize,
    pub active_proposals: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_threshold() -> u32 {
    1
}

fn default_quorum() -> u32 {
    50
}

/// Settings for a new collection
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: String,
    /// The creator is always added to this set
    #[serde(default)]
    #[validate(length(max = 50, message = "At most 50 admins"))]
    pub admins: Vec<Principal>,
    pub governance: GovernanceModel,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_quorum")]
    #[validate(range(min = 1, max = 100, message = "Quorum must be between 1 and 100"))]
    pub quorum_threshold: u32,
    pub governance_token: Option<String>,
    pub sns_governance: Option<String>,
}

/// Fields an admin may edit directly without a proposal
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CollectionUpdate {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,
}
