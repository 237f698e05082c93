//! Governance engine
//!
//! Ties the collection registry, the governance strategies and the remote
//! collaborators together. Every operation follows the same shape: validate
//! against a snapshot, make any remote call without holding the registry
//! lock, then re-validate and commit against fresh state.

mod collections;
mod documents;
mod executor;
mod proposals;
pub mod strategy;
mod sync;
mod voting;

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::collection::CollectionRegistry;
use crate::config::GovernanceConfig;
use crate::error::AppError;
use crate::external::{EmbeddingService, RemoteGovernance, TokenLedger};
use crate::proposal::{Proposal, ProposalStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use strategy::Tally;

/// Remote collaborators the engine calls out to
#[derive(Clone)]
pub struct Services {
    pub embeddings: Arc<dyn EmbeddingService>,
    pub ledger: Arc<dyn TokenLedger>,
    pub remote: Arc<dyn RemoteGovernance>,
}

pub struct GovernanceEngine {
    registry: CollectionRegistry,
    services: Services,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditLog>,
    config: GovernanceConfig,
}

impl GovernanceEngine {
    pub fn new(
        registry: CollectionRegistry,
        services: Services,
        clock: Arc<dyn Clock>,
        audit: Arc<AuditLog>,
        config: GovernanceConfig,
    ) -> Self {
        Self {
            registry,
            services,
            clock,
            audit,
            config,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub async fn collection_count(&self) -> usize {
        self.registry.count().await
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Move an Active proposal to the status a tally decided, if any.
/// Returns the new status when a transition happened.
fn apply_tally(
    proposal: &mut Proposal,
    tally: Tally,
    now: DateTime<Utc>,
) -> Result<Option<ProposalStatus>, AppError> {
    let next = match tally {
        Tally::Pending => return Ok(None),
        Tally::Approved => ProposalStatus::Approved,
        Tally::Rejected => ProposalStatus::Rejected,
    };
    if proposal.status != ProposalStatus::Active {
        return Ok(None);
    }
    proposal.transition(next, now).map_err(AppError::Internal)?;
    Ok(Some(next))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::auth::Principal;
    use crate::clock::ManualClock;
    use crate::collection::{CollectionConfig, GovernanceModel};
    use crate::external::memory::{MemoryEmbeddingService, MemoryRemoteGovernance, MemoryTokenLedger};
    use std::time::Duration;
    use uuid::Uuid;

    pub fn p(name: &str) -> Principal {
        Principal::parse(name).unwrap()
    }

    pub struct Harness {
        pub engine: GovernanceEngine,
        pub embeddings: Arc<MemoryEmbeddingService>,
        pub ledger: Arc<MemoryTokenLedger>,
        pub remote: Arc<MemoryRemoteGovernance>,
        pub clock: Arc<ManualClock>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::build(MemoryEmbeddingService::new(), GovernanceConfig::default())
        }

        pub fn build(embeddings: MemoryEmbeddingService, config: GovernanceConfig) -> Self {
            let embeddings = Arc::new(embeddings);
            let ledger = Arc::new(MemoryTokenLedger::new());
            let remote = Arc::new(MemoryRemoteGovernance::new());
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let audit = Arc::new(AuditLog::new());
            let config = GovernanceConfig {
                embed_backoff: Duration::from_millis(1),
                ..config
            };

            let engine = GovernanceEngine::new(
                CollectionRegistry::new(audit.clone()),
                Services {
                    embeddings: embeddings.clone(),
                    ledger: ledger.clone(),
                    remote: remote.clone(),
                },
                clock.clone(),
                audit,
                config,
            );

            Self {
                engine,
                embeddings,
                ledger,
                remote,
                clock,
            }
        }

        /// First admin is the creator
        pub async fn collection(
            &self,
            governance: GovernanceModel,
            admins: &[&str],
            threshold: u32,
            quorum: u32,
        ) -> Uuid {
            let config = CollectionConfig {
                name: "Field notes".to_string(),
                description: "Shared research".to_string(),
                admins: admins.iter().map(|a| p(a)).collect(),
                governance,
                threshold,
                quorum_threshold: quorum,
                governance_token: (governance == GovernanceModel::TokenBased)
                    .then(|| "gov-token".to_string()),
                sns_governance: (governance == GovernanceModel::SnsIntegrated)
                    .then(|| "sns-root".to_string()),
            };
            self.engine
                .create_collection(&p(admins[0]), config)
                .await
                .unwrap()
                .id
        }
    }
}
