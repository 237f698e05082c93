//! Collection lifecycle

use super::GovernanceEngine;
use crate::audit::{AuditAction, RESOURCE_COLLECTION};
use crate::auth::Principal;
use crate::collection::{
    Collection, CollectionConfig, CollectionMetrics, CollectionSummary, CollectionUpdate,
    GovernanceModel,
};
use crate::error::{invalid_input, not_authorized, AppError};
use crate::external::ExternalError;
use crate::proposal::ProposalStore;
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

fn required_reference(
    value: Option<String>,
    what: &str,
    model: GovernanceModel,
) -> Result<Option<String>, AppError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(Some(v)),
        _ => Err(invalid_input(format!("{} governance requires a {}", model, what))),
    }
}

impl GovernanceEngine {
    /// Create a collection and provision its index in the embedding service
    pub async fn create_collection(
        &self,
        creator: &Principal,
        config: CollectionConfig,
    ) -> Result<CollectionSummary, AppError> {
        config
            .validate()
            .map_err(|e| invalid_input(e.to_string()))?;

        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid_input("Name must not be blank"));
        }

        let mut admins: BTreeSet<Principal> = config.admins.into_iter().collect();
        admins.insert(creator.clone());

        if config.threshold == 0 {
            return Err(invalid_input("Threshold must be at least 1"));
        }
        if config.governance == GovernanceModel::Multisig
            && config.threshold as usize > admins.len()
        {
            return Err(invalid_input(format!(
                "Threshold {} cannot exceed the {} admins",
                config.threshold,
                admins.len()
            )));
        }

        let governance_token = if config.governance == GovernanceModel::TokenBased {
            required_reference(config.governance_token, "governance token", config.governance)?
        } else if config.governance_token.is_some() {
            return Err(invalid_input(
                "A governance token only applies to token-based governance",
            ));
        } else {
            None
        };

        let sns_governance = if config.governance == GovernanceModel::SnsIntegrated {
            required_reference(
                config.sns_governance,
                "SNS governance reference",
                config.governance,
            )?
        } else if config.sns_governance.is_some() {
            return Err(invalid_input(
                "An SNS reference only applies to SNS-integrated governance",
            ));
        } else {
            None
        };

        let id = Uuid::new_v4();
        let index_id = self.services.embeddings.create_index(id, &name).await?;

        let now = self.now();
        let collection = Collection {
            id,
            name,
            description: config.description,
            creator: creator.clone(),
            admins,
            governance: config.governance,
            threshold: config.threshold,
            quorum_threshold: config.quorum_threshold,
            governance_token,
            sns_governance,
            index_id: index_id.clone(),
            metrics: CollectionMetrics::default(),
            proposals: ProposalStore::new(),
            created_at: now,
            updated_at: now,
        };
        let summary = collection.summary();

        if let Err(e) = self.registry.insert(collection).await {
            if let Err(cleanup) = self.services.embeddings.delete_index(&index_id).await {
                warn!("Index {} left behind for collection {}: {}", index_id, id, cleanup);
            }
            return Err(e);
        }

        self.audit
            .record(
                Some(creator),
                AuditAction::CollectionCreated,
                RESOURCE_COLLECTION,
                id.to_string(),
                Some(serde_json::json!({
                    "name": summary.name,
                    "governance": summary.governance,
                    "admins": summary.admins.len(),
                })),
            )
            .await;
        info!(
            "📁 Created collection '{}' ({}) with {} governance",
            summary.name, id, summary.governance
        );

        Ok(summary)
    }

    pub async fn get_collection(&self, id: Uuid) -> Result<CollectionSummary, AppError> {
        self.registry
            .read(id, self.now(), |c| Ok(c.summary()))
            .await
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionSummary>, AppError> {
        self.registry.list(self.now()).await
    }

    /// Edit name or description. Governance settings change only through proposals.
    pub async fn update_collection(
        &self,
        id: Uuid,
        caller: &Principal,
        update: CollectionUpdate,
    ) -> Result<CollectionSummary, AppError> {
        update
            .validate()
            .map_err(|e| invalid_input(e.to_string()))?;

        let summary = self
            .registry
            .update(id, self.now(), |c| {
                if !c.is_admin(caller) {
                    return Err(not_authorized("Only admins can edit a collection"));
                }
                if let Some(name) = update.name.as_deref() {
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(invalid_input("Name must not be blank"));
                    }
                    c.name = name.to_string();
                }
                if let Some(description) = update.description {
                    c.description = description;
                }
                Ok(c.summary())
            })
            .await?;

        self.audit
            .record(
                Some(caller),
                AuditAction::CollectionUpdated,
                RESOURCE_COLLECTION,
                id.to_string(),
                None,
            )
            .await;
        Ok(summary)
    }

    /// Delete the remote index first, then the record and its proposals
    pub async fn delete_collection(&self, id: Uuid, caller: &Principal) -> Result<(), AppError> {
        let index_id = self
            .registry
            .read(id, self.now(), |c| {
                if !c.is_admin(caller) {
                    return Err(not_authorized("Only admins can delete a collection"));
                }
                Ok(c.index_id.clone())
            })
            .await?;

        match self.services.embeddings.delete_index(&index_id).await {
            Ok(()) => {}
            Err(ExternalError::NotFound(_)) => {
                warn!("Index {} of collection {} was already gone", index_id, id);
            }
            Err(e) => return Err(e.into()),
        }

        let removed = self.registry.remove(id).await?;

        self.audit
            .record(
                Some(caller),
                AuditAction::CollectionDeleted,
                RESOURCE_COLLECTION,
                id.to_string(),
                Some(serde_json::json!({ "proposals": removed.proposals.count() })),
            )
            .await;
        info!("🗑️  Deleted collection '{}' ({})", removed.name, id);
        Ok(())
    }

    pub async fn collection_metrics(&self, id: Uuid) -> Result<CollectionMetrics, AppError> {
        self.registry.read(id, self.now(), |c| Ok(c.metrics)).await
    }
}
