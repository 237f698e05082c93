//! Audit log
//!
//! Append-only record of collection and proposal lifecycle events.

use crate::auth::Principal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const RESOURCE_COLLECTION: &str = "collection";
pub const RESOURCE_PROPOSAL: &str = "proposal";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<Principal>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CollectionCreated,
    CollectionUpdated,
    CollectionDeleted,
    DocumentsStaged,

    ProposalCreated,
    VoteCast,
    ProposalApproved,
    ProposalRejected,
    ProposalExpired,
    ProposalExecuted,
    ExternalLinked,
    ExternalSynced,
}

/// Proposal ids are only unique per collection
pub fn proposal_resource_id(collection_id: Uuid, proposal_id: u64) -> String {
    format!("{}/{}", collection_id, proposal_id)
}

#[derive(Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        actor: Option<&Principal>,
        action: AuditAction,
        resource_type: &str,
        resource_id: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.cloned(),
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.into(),
            details,
        };
        self.entries.write().await.push(entry);
    }

    /// Most recent first. A resource id matches itself and anything nested below it.
    pub async fn query(
        &self,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        limit: usize,
    ) -> Vec<AuditEntry> {
        let log = self.entries.read().await;

        log.iter()
            .rev()
            .filter(|e| {
                resource_type.map(|t| e.resource_type == t).unwrap_or(true)
                    && resource_id
                        .map(|id| {
                            e.resource_id == id
                                || e.resource_id
                                    .strip_prefix(id)
                                    .is_some_and(|rest| rest.starts_with('/'))
                        })
                        .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect()
    }
}
