//! Proposal execution
//!
//! Execution happens in three steps:
//! 1. Under the registry lock: check the caller and the Approved status,
//!    validate and apply the local effect, and mark the proposal Executed.
//!    A second caller arriving after this point sees Executed and fails.
//! 2. Without the lock: perform the remote side effects. Embeddings run with
//!    bounded concurrency and per-document retries.
//! 3. Under the lock again: record the outcome and bump document counts.
//!
//! Remote failures never revert step 1; they are listed in the report.

use super::strategy::resolve;
use super::GovernanceEngine;
use crate::audit::{proposal_resource_id, AuditAction, RESOURCE_PROPOSAL};
use crate::auth::Principal;
use crate::collection::{Collection, GovernanceModel};
use crate::error::{invalid_input, invalid_operation, not_authorized, AppError};
use crate::external::NewDocument;
use crate::proposal::{DocumentOutcome, ExecutionReport, Proposal, ProposalId, ProposalStatus, ProposalType};
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Remote work left over once the local effect is committed
pub(super) enum RemoteWork {
    None,
    Embed(Vec<EmbedJob>),
    TransferOwner(Principal),
}

pub(super) enum EmbedJob {
    Inline(NewDocument),
    Staged(String),
}

impl EmbedJob {
    fn label(&self) -> String {
        match self {
            EmbedJob::Inline(doc) => doc.title.clone(),
            EmbedJob::Staged(id) => id.clone(),
        }
    }
}

/// Validate and apply the collection-level part of a proposal.
/// Any error leaves the caller's copy to be discarded.
pub(super) fn apply_local_effect(collection: &mut Collection, proposal_type: &ProposalType) -> Result<(RemoteWork, String), AppError> {
    match proposal_type {
        ProposalType::EmbedDocument { documents } => Ok((
            RemoteWork::Embed(documents.iter().cloned().map(EmbedJob::Inline).collect()),
            format!("Embedding {} document(s)", documents.len()),
        )),
        ProposalType::BatchEmbed { document_ids } => Ok((
            RemoteWork::Embed(document_ids.iter().cloned().map(EmbedJob::Staged).collect()),
            format!("Embedding {} staged document(s)", document_ids.len()),
        )),
        ProposalType::AddAdmin { principal } => {
            if !collection.admins.insert(principal.clone()) {
                return Err(invalid_operation(format!("{} is already an admin", principal)));
            }
            Ok((RemoteWork::None, format!("Added admin {}", principal)))
        }
        ProposalType::RemoveAdmin { principal } => {
            if !collection.is_admin(principal) {
                return Err(invalid_operation(format!("{} is not an admin", principal)));
            }
            if collection.admins.len() == 1 {
                return Err(invalid_operation("Cannot remove the last admin"));
            }
            if collection.governance == GovernanceModel::Multisig
                && collection.admins.len() - 1 < collection.threshold as usize
            {
                return Err(invalid_operation(format!(
                    "Removing {} would leave fewer admins than the threshold of {}",
                    principal, collection.threshold
                )));
            }
            collection.admins.remove(principal);
            Ok((RemoteWork::None, format!("Removed admin {}", principal)))
        }
        ProposalType::ChangeThreshold { value } => {
            if collection.governance != GovernanceModel::Multisig {
                return Err(invalid_input("Threshold changes only apply to multisig collections"));
            }
            if *value == 0 || *value as usize > collection.admins.len() {
                return Err(invalid_input(format!(
                    "Threshold must be between 1 and {}",
                    collection.admins.len()
                )));
            }
            collection.threshold = *value;
            Ok((RemoteWork::None, format!("Threshold set to {}", value)))
        }
        ProposalType::UpdateQuorum { value } => {
            if collection.governance != GovernanceModel::TokenBased {
                return Err(invalid_input("Quorum changes only apply to token-based collections"));
            }
            if !(1..=100).contains(value) {
                return Err(invalid_input("Quorum must be between 1 and 100"));
            }
            collection.quorum_threshold = *value;
            Ok((RemoteWork::None, format!("Quorum set to {}%", value)))
        }
        ProposalType::TransferGenesis { new_owner } => {
            collection.creator = new_owner.clone();
            Ok((
                RemoteWork::TransferOwner(new_owner.clone()),
                format!("Ownership transferred to {}", new_owner),
            ))
        }
    }
}

impl GovernanceEngine {
    pub async fn execute_proposal(
        &self,
        collection_id: Uuid,
        proposal_id: ProposalId,
        caller: &Principal,
    ) -> Result<Proposal, AppError> {
        let now = self.now();
        let (proposal, index_id, work, summary) = self
            .registry
            .update(collection_id, now, |c| {
                let proposal = c.proposals.get(proposal_id)?;
                if !resolve(c.governance).can_execute(c, proposal, caller) {
                    return Err(not_authorized("Only admins can execute proposals"));
                }
                if proposal.status != ProposalStatus::Approved {
                    return Err(invalid_operation(format!(
                        "Proposal {} is {}; only approved proposals can be executed",
                        proposal_id, proposal.status
                    )));
                }

                let proposal_type = proposal.proposal_type.clone();
                let (work, summary) = apply_local_effect(c, &proposal_type)?;

                let proposal = c.proposals.get_mut(proposal_id)?;
                proposal
                    .transition(ProposalStatus::Executed, now)
                    .map_err(AppError::Internal)?;
                proposal.executed_at = Some(now);
                proposal.executed_by = Some(caller.clone());
                Ok((proposal.clone(), c.index_id.clone(), work, summary))
            })
            .await?;

        info!("⚙️  Executing proposal {} in {}: {}", proposal_id, collection_id, summary);

        let mut report = ExecutionReport {
            executed_at: now,
            executed_by: caller.clone(),
            summary,
            documents: Vec::new(),
            warnings: Vec::new(),
        };

        match work {
            RemoteWork::None => {}
            RemoteWork::Embed(jobs) => {
                report.documents = self.dispatch_embeds(&index_id, jobs).await;
            }
            RemoteWork::TransferOwner(new_owner) => {
                if let Err(e) = self
                    .services
                    .embeddings
                    .transfer_owner(&index_id, &new_owner)
                    .await
                {
                    warn!("Index {} still lists the previous owner: {}", index_id, e);
                    report
                        .warnings
                        .push(format!("Embedding service ownership not updated: {}", e));
                }
            }
        }

        let succeeded = report.succeeded() as u64;
        let committed = self
            .registry
            .update(collection_id, self.now(), |c| {
                c.metrics.document_count += succeeded;
                let stored = c.proposals.get_mut(proposal_id)?;
                stored.execution = Some(report.clone());
                Ok(stored.clone())
            })
            .await;

        let proposal = match committed {
            Ok(stored) => stored,
            Err(AppError::NotFound(_)) => {
                warn!(
                    "Collection {} disappeared while proposal {} was executing",
                    collection_id, proposal_id
                );
                Proposal {
                    execution: Some(report.clone()),
                    ..proposal
                }
            }
            Err(e) => return Err(e),
        };

        self.audit
            .record(
                Some(caller),
                AuditAction::ProposalExecuted,
                RESOURCE_PROPOSAL,
                proposal_resource_id(collection_id, proposal_id),
                Some(serde_json::json!({
                    "kind": proposal.proposal_type.kind(),
                    "succeeded": report.succeeded(),
                    "failed": report.failed(),
                    "warnings": report.warnings,
                })),
            )
            .await;

        if report.failed() > 0 {
            warn!(
                "Proposal {} in {} executed with {} of {} documents failing",
                proposal_id,
                collection_id,
                report.failed(),
                report.documents.len()
            );
        }

        Ok(proposal)
    }

    async fn dispatch_embeds(&self, index_id: &str, jobs: Vec<EmbedJob>) -> Vec<DocumentOutcome> {
        stream::iter(jobs)
            .map(|job| self.embed_with_retry(index_id, job))
            .buffered(self.config.embed_concurrency.max(1))
            .collect()
            .await
    }

    async fn embed_with_retry(&self, index_id: &str, job: EmbedJob) -> DocumentOutcome {
        let max_attempts = self.config.embed_max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = match &job {
                EmbedJob::Inline(doc) => self.services.embeddings.embed(index_id, doc).await,
                EmbedJob::Staged(id) => self
                    .services
                    .embeddings
                    .embed_existing(index_id, id)
                    .await
                    .map(|_| id.clone()),
            };

            match result {
                Ok(document_id) => {
                    return DocumentOutcome {
                        document: job.label(),
                        document_id: Some(document_id),
                        attempts,
                        error: None,
                    }
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let delay = self.backoff(attempts);
                    warn!(
                        "Embedding '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        job.label(),
                        attempts,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return DocumentOutcome {
                        document: job.label(),
                        document_id: None,
                        attempts,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    }

    /// Exponential backoff with up to 50% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.embed_backoff.as_millis() as u64;
        let exp = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let jitter = if exp >= 2 {
            rand::thread_rng().gen_range(0..=exp / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{p, Harness};
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::external::memory::MemoryEmbeddingService;
    use crate::external::RemoteDecision;
    use crate::proposal::VoteChoice;
    use pretty_assertions::assert_eq;

    async fn approved(h: &Harness, id: Uuid, proposal_type: ProposalType) -> ProposalId {
        let pid = h
            .engine
            .create_proposal(id, &p("alice"), String::new(), proposal_type)
            .await
            .unwrap()
            .id;
        h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::Yes).await.unwrap();
        let proposal = h.engine.get_proposal(id, pid).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        pid
    }

    #[tokio::test]
    async fn test_execute_twice_applies_once() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::EmbedDocument {
            documents: vec![NewDocument::new("Atlas", "maps")],
        })
        .await;

        let first = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap();
        assert_eq!(first.status, ProposalStatus::Executed);

        let err = h.engine.execute_proposal(id, pid, &p("bob")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));

        assert_eq!(h.embeddings.embed_calls(), 1);
        assert_eq!(h.engine.collection_metrics(id).await.unwrap().document_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_execute_produces_one_set_of_side_effects() {
        let h = Harness::build(
            MemoryEmbeddingService::new().with_latency(Duration::from_millis(20)),
            GovernanceConfig::default(),
        );
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::EmbedDocument {
            documents: vec![
                NewDocument::new("One", "1"),
                NewDocument::new("Two", "2"),
            ],
        })
        .await;

        let alice = p("alice");
        let bob = p("bob");
        let (a, b) = tokio::join!(
            h.engine.execute_proposal(id, pid, &alice),
            h.engine.execute_proposal(id, pid, &bob),
        );

        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(loser, AppError::InvalidOperation(_)));

        assert_eq!(h.embeddings.embed_calls(), 2);
        assert_eq!(h.engine.collection_metrics(id).await.unwrap().document_count, 2);
    }

    #[tokio::test]
    async fn test_batch_embed_with_one_permanent_failure() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;

        let staged = h
            .engine
            .stage_documents(
                id,
                &p("alice"),
                vec![
                    NewDocument::new("Good one", "a"),
                    NewDocument::new("Broken", "b"),
                    NewDocument::new("Good two", "c"),
                ],
                None,
            )
            .await
            .unwrap();
        h.embeddings.fail_permanently("Broken");

        h.engine.cast_vote(id, staged.id, &p("alice"), VoteChoice::Yes).await.unwrap();
        let executed = h.engine.execute_proposal(id, staged.id, &p("alice")).await.unwrap();

        assert_eq!(executed.status, ProposalStatus::Executed);
        let report = executed.execution.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);

        let failed: Vec<_> = report.documents.iter().filter(|d| !d.succeeded()).collect();
        assert_eq!(failed.len(), 1);
        // Permanent rejections are not retried
        assert_eq!(failed[0].attempts, 1);

        assert_eq!(h.engine.collection_metrics(id).await.unwrap().document_count, 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;
        h.embeddings.fail_times("Flaky", 2);

        let pid = approved(&h, id, ProposalType::EmbedDocument {
            documents: vec![NewDocument::new("Flaky", "eventually")],
        })
        .await;
        let executed = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap();

        let report = executed.execution.unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.documents[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_give_up_after_max_attempts() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;
        h.embeddings.fail_times("Stubborn", 10);

        let pid = approved(&h, id, ProposalType::EmbedDocument {
            documents: vec![NewDocument::new("Stubborn", "never")],
        })
        .await;
        let executed = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap();

        let report = executed.execution.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.documents[0].attempts, 3);
        assert_eq!(executed.status, ProposalStatus::Executed);
    }

    #[tokio::test]
    async fn test_removing_sole_admin_fails_and_leaves_admins() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::RemoveAdmin { principal: p("alice") }).await;

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));

        assert_eq!(h.engine.get_collection(id).await.unwrap().admins, vec![p("alice")]);
        assert_eq!(
            h.engine.get_proposal(id, pid).await.unwrap().status,
            ProposalStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_remove_admin_respects_threshold() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 2, 50).await;
        let pid = h
            .engine
            .create_proposal(id, &p("alice"), String::new(), ProposalType::RemoveAdmin { principal: p("bob") })
            .await
            .unwrap()
            .id;
        h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::Yes).await.unwrap();
        h.engine.cast_vote(id, pid, &p("bob"), VoteChoice::Yes).await.unwrap();

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_threshold_keeps_proposal_approved() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::ChangeThreshold { value: 5 }).await;

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(
            h.engine.get_proposal(id, pid).await.unwrap().status,
            ProposalStatus::Approved
        );
        assert_eq!(h.engine.get_collection(id).await.unwrap().threshold, 1);

        let ok = approved(&h, id, ProposalType::ChangeThreshold { value: 2 }).await;
        h.engine.execute_proposal(id, ok, &p("bob")).await.unwrap();
        assert_eq!(h.engine.get_collection(id).await.unwrap().threshold, 2);
    }

    #[tokio::test]
    async fn test_out_of_range_quorum_keeps_proposal_approved() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::TokenBased, &["alice"], 1, 50).await;
        h.ledger.set_balance("gov-token", &p("alice"), 60);
        h.ledger.set_supply("gov-token", 100);
        let pid = approved(&h, id, ProposalType::UpdateQuorum { value: 101 }).await;

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(
            h.engine.get_proposal(id, pid).await.unwrap().status,
            ProposalStatus::Approved
        );
        assert_eq!(h.engine.get_collection(id).await.unwrap().quorum_threshold, 50);
    }

    #[tokio::test]
    async fn test_expired_proposal_cannot_execute() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 2, 50).await;
        let pid = h
            .engine
            .create_proposal(id, &p("alice"), String::new(), ProposalType::AddAdmin { principal: p("carol") })
            .await
            .unwrap()
            .id;
        h.clock.advance(chrono::Duration::days(8));

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
        assert_eq!(
            h.engine.get_proposal(id, pid).await.unwrap().status,
            ProposalStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_rejected_proposal_cannot_execute() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::SnsIntegrated, &["alice"], 1, 50).await;
        let pid = h
            .engine
            .create_proposal(id, &p("alice"), String::new(), ProposalType::AddAdmin { principal: p("carol") })
            .await
            .unwrap()
            .id;
        h.engine
            .link_external_id(id, pid, &p("alice"), "ext-9".into())
            .await
            .unwrap();
        h.remote.set_decision("ext-9", RemoteDecision::Rejected);
        let synced = h.engine.sync_status(id, pid).await.unwrap();
        assert_eq!(synced.status, ProposalStatus::Rejected);

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
        assert_eq!(h.engine.get_collection(id).await.unwrap().admins, vec![p("alice")]);
    }

    #[tokio::test]
    async fn test_removing_non_admin_is_invalid_operation() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::RemoveAdmin { principal: p("stranger") }).await;

        let err = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
        assert_eq!(
            h.engine.get_collection(id).await.unwrap().admins,
            vec![p("alice"), p("bob")]
        );
    }

    #[tokio::test]
    async fn test_transfer_genesis_updates_owner_everywhere() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::TransferGenesis { new_owner: p("heir") }).await;

        let executed = h.engine.execute_proposal(id, pid, &p("alice")).await.unwrap();
        assert!(executed.execution.unwrap().warnings.is_empty());
        assert_eq!(h.engine.get_collection(id).await.unwrap().creator, p("heir"));
        assert_eq!(
            h.embeddings.owner_of(&format!("index-{}", id.simple())),
            Some(p("heir"))
        );
    }

    #[tokio::test]
    async fn test_only_admins_execute() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice"], 1, 50).await;
        let pid = approved(&h, id, ProposalType::AddAdmin { principal: p("bob") }).await;

        let err = h.engine.execute_proposal(id, pid, &p("mallory")).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));

        let active = h
            .engine
            .create_proposal(id, &p("alice"), String::new(), ProposalType::AddAdmin { principal: p("carol") })
            .await
            .unwrap();
        let err = h.engine.execute_proposal(id, active.id, &p("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
    }

    #[test]
    fn test_backoff_grows() {
        let h = Harness::build(
            MemoryEmbeddingService::new(),
            GovernanceConfig::default(),
        );
        // Harness pins the base delay to 1ms
        assert_eq!(h.engine.backoff(1), Duration::from_millis(1));
        let third = h.engine.backoff(3);
        assert!(third >= Duration::from_millis(4) && third <= Duration::from_millis(6));
    }
}
