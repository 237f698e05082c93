//! Document access and staging

use super::GovernanceEngine;
use crate::audit::{AuditAction, RESOURCE_COLLECTION};
use crate::auth::Principal;
use crate::error::{invalid_input, not_authorized, not_found_error, AppError};
use crate::external::{DocumentRecord, NewDocument, SearchHit};
use crate::proposal::{Proposal, ProposalType};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MAX_SEARCH_RESULTS: usize = 50;

impl GovernanceEngine {
    /// Search the collection's embedded documents and count the query
    pub async fn search_documents(
        &self,
        collection_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(invalid_input("Search query must not be empty"));
        }
        if limit == 0 || limit > MAX_SEARCH_RESULTS {
            return Err(invalid_input(format!(
                "Limit must be between 1 and {}",
                MAX_SEARCH_RESULTS
            )));
        }

        let index_id = self
            .registry
            .read(collection_id, self.now(), |c| Ok(c.index_id.clone()))
            .await?;

        let hits = self
            .services
            .embeddings
            .search(&index_id, query, limit)
            .await?;

        self.registry
            .update(collection_id, self.now(), |c| {
                c.metrics.search_count += 1;
                Ok(())
            })
            .await?;

        debug!("Search in {} returned {} hits", collection_id, hits.len());
        Ok(hits)
    }

    pub async fn get_document(
        &self,
        collection_id: Uuid,
        document_id: &str,
    ) -> Result<DocumentRecord, AppError> {
        let index_id = self
            .registry
            .read(collection_id, self.now(), |c| Ok(c.index_id.clone()))
            .await?;

        self.services
            .embeddings
            .get_document(&index_id, document_id)
            .await?
            .ok_or_else(|| not_found_error(format!("Document {} not found", document_id)))
    }

    /// Upload documents without embedding them and open a BatchEmbed proposal
    /// over the stored ids.
    pub async fn stage_documents(
        &self,
        collection_id: Uuid,
        caller: &Principal,
        documents: Vec<NewDocument>,
        description: Option<String>,
    ) -> Result<Proposal, AppError> {
        ProposalType::EmbedDocument {
            documents: documents.clone(),
        }
        .check_shape(self.config.max_documents_per_proposal)
        .map_err(invalid_input)?;

        let index_id = self
            .registry
            .read(collection_id, self.now(), |c| {
                if !c.is_admin(caller) {
                    return Err(not_authorized("Only admins can stage documents"));
                }
                Ok(c.index_id.clone())
            })
            .await?;

        let mut document_ids = Vec::with_capacity(documents.len());
        for document in &documents {
            match self
                .services
                .embeddings
                .add_document(&index_id, document)
                .await
            {
                Ok(id) => document_ids.push(id),
                Err(e) => {
                    if !document_ids.is_empty() {
                        warn!(
                            "Staging into {} stopped after {} of {} documents",
                            collection_id,
                            document_ids.len(),
                            documents.len()
                        );
                    }
                    return Err(e.into());
                }
            }
        }

        self.audit
            .record(
                Some(caller),
                AuditAction::DocumentsStaged,
                RESOURCE_COLLECTION,
                collection_id.to_string(),
                Some(serde_json::json!({ "documentIds": document_ids })),
            )
            .await;

        let proposal_type = ProposalType::BatchEmbed { document_ids };
        let description = description.unwrap_or_else(|| proposal_type.description());
        self.create_proposal(collection_id, caller, description, proposal_type)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{p, Harness};
    use super::*;
    use crate::collection::GovernanceModel;
    use crate::proposal::ProposalStatus;

    #[tokio::test]
    async fn test_stage_opens_batch_embed_proposal() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 2, 50).await;

        let proposal = h
            .engine
            .stage_documents(
                id,
                &p("alice"),
                vec![
                    NewDocument::new("Minutes", "first meeting"),
                    NewDocument::new("Charter", "we agree"),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(proposal.status, ProposalStatus::Active);
        match &proposal.proposal_type {
            ProposalType::BatchEmbed { document_ids } => {
                assert_eq!(document_ids.len(), 2);
                let staged = h.engine.get_document(id, &document_ids[0]).await.unwrap();
                assert_eq!(staged.title, "Minutes");
                assert!(!staged.embedded);
            }
            other => panic!("unexpected proposal type {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stage_requires_admin() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;

        let err = h
            .engine
            .stage_documents(id, &p("mallory"), vec![NewDocument::new("x", "y")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_search_counts_queries() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Permissionless, &["alice"], 1, 50).await;

        h.engine
            .create_proposal(
                id,
                &p("alice"),
                "seed".into(),
                ProposalType::EmbedDocument {
                    documents: vec![NewDocument::new("Tides", "the moon pulls the ocean")],
                },
            )
            .await
            .unwrap();

        let hits = h.engine.search_documents(id, "ocean", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        h.engine.search_documents(id, "nothing", 5).await.unwrap();

        let metrics = h.engine.collection_metrics(id).await.unwrap();
        assert_eq!(metrics.search_count, 2);
        assert_eq!(metrics.document_count, 1);

        assert!(matches!(
            h.engine.search_documents(id, "  ", 5).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            h.engine.get_document(id, "doc-404").await,
            Err(AppError::NotFound(_))
        ));
    }
}
