//! Collection registry
//!
//! Owns every collection record behind one lock. Mutations run against a
//! copy and are swapped in only after they succeed and are persisted, so a
//! failed operation leaves nothing half-applied. Overdue proposals are
//! expired on every access.

use crate::audit::{proposal_resource_id, AuditAction, AuditLog, RESOURCE_PROPOSAL};
use crate::collection::{Collection, CollectionSummary};
use crate::db::CollectionRepository;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

pub struct CollectionRegistry {
    collections: RwLock<BTreeMap<Uuid, Collection>>,
    repository: Option<CollectionRepository>,
    audit: Arc<AuditLog>,
}

fn missing(id: Uuid) -> AppError {
    AppError::NotFound(format!("Collection {} not found", id))
}

fn report_violations(collection: &Collection) {
    for violation in collection.invariant_violations() {
        error!("Invariant violated in collection {}: {}", collection.id, violation);
    }
}

impl CollectionRegistry {
    /// Memory-only registry
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            repository: None,
            audit,
        }
    }

    /// Registry backed by Postgres, preloaded with every stored collection
    pub async fn with_repository(
        repository: CollectionRepository,
        audit: Arc<AuditLog>,
    ) -> Result<Self, AppError> {
        let stored = repository.load_all().await?;
        let mut collections = BTreeMap::new();
        for collection in stored {
            report_violations(&collection);
            collections.insert(collection.id, collection);
        }
        info!("📚 Loaded {} collections", collections.len());

        Ok(Self {
            collections: RwLock::new(collections),
            repository: Some(repository),
            audit,
        })
    }

    async fn persist(&self, collection: &Collection) -> Result<(), AppError> {
        if let Some(repository) = &self.repository {
            repository.save(collection).await?;
        }
        Ok(())
    }

    /// Expire overdue proposals in place and write the change through
    async fn expire_due(&self, collection: &mut Collection, now: DateTime<Utc>) -> Result<(), AppError> {
        if !collection.proposals.has_due_expiry(now) {
            return Ok(());
        }

        let mut draft = collection.clone();
        let expired = draft.proposals.expire_due(now);
        draft.updated_at = now;
        self.persist(&draft).await?;
        *collection = draft;

        for proposal_id in expired {
            info!("⌛ Proposal {} in collection {} expired", proposal_id, collection.id);
            self.audit
                .record(
                    None,
                    AuditAction::ProposalExpired,
                    RESOURCE_PROPOSAL,
                    proposal_resource_id(collection.id, proposal_id),
                    None,
                )
                .await;
        }
        Ok(())
    }

    pub async fn insert(&self, collection: Collection) -> Result<(), AppError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(&collection.id) {
            return Err(AppError::InvalidOperation(format!(
                "Collection {} already exists",
                collection.id
            )));
        }
        report_violations(&collection);
        self.persist(&collection).await?;
        collections.insert(collection.id, collection);
        Ok(())
    }

    /// Run a read-only closure against a collection
    pub async fn read<R>(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        f: impl FnOnce(&Collection) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        {
            let collections = self.collections.read().await;
            let collection = collections.get(&id).ok_or_else(|| missing(id))?;
            if !collection.proposals.has_due_expiry(now) {
                return f(collection);
            }
        }

        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(&id).ok_or_else(|| missing(id))?;
        self.expire_due(collection, now).await?;
        f(collection)
    }

    /// Run a mutation against a copy of the collection and commit it only on success
    pub async fn update<R>(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Collection) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let mut collections = self.collections.write().await;
        let current = collections.get_mut(&id).ok_or_else(|| missing(id))?;
        self.expire_due(current, now).await?;

        let mut draft = current.clone();
        let out = f(&mut draft)?;
        draft.updated_at = now;
        report_violations(&draft);
        self.persist(&draft).await?;
        *current = draft;
        Ok(out)
    }

    pub async fn list(&self, now: DateTime<Utc>) -> Result<Vec<CollectionSummary>, AppError> {
        {
            let collections = self.collections.read().await;
            if !collections.values().any(|c| c.proposals.has_due_expiry(now)) {
                return Ok(collections.values().map(Collection::summary).collect());
            }
        }

        let mut collections = self.collections.write().await;
        for collection in collections.values_mut() {
            self.expire_due(collection, now).await?;
        }
        Ok(collections.values().map(Collection::summary).collect())
    }

    pub async fn remove(&self, id: Uuid) -> Result<Collection, AppError> {
        let mut collections = self.collections.write().await;
        if !collections.contains_key(&id) {
            return Err(missing(id));
        }
        if let Some(repository) = &self.repository {
            repository.delete(id).await?;
        }
        collections.remove(&id).ok_or_else(|| missing(id))
    }

    pub async fn count(&self) -> usize {
        self.collections.read().await.len()
    }
}
