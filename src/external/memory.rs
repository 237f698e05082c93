//! In-process stand-ins for the remote collaborators.
//!
//! Used when no service URL is configured and throughout the tests. Each one
//! counts calls and can be told to fail.

use super::*;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// EMBEDDING SERVICE
// =============================================================================

struct StoredDocument {
    record: DocumentRecord,
    content: String,
}

#[derive(Default)]
struct MemoryIndex {
    owner: Option<Principal>,
    documents: BTreeMap<String, StoredDocument>,
}

/// In-memory document index
#[derive(Default)]
pub struct MemoryEmbeddingService {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
    next_id: AtomicU64,
    /// Document ids or titles whose embedding always fails
    permanent_failures: Mutex<HashSet<String>>,
    /// Document ids or titles that fail this many more times before succeeding
    transient_failures: Mutex<HashMap<String, u32>>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
    embed_calls: AtomicU32,
}

impl MemoryEmbeddingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_permanently(&self, key: impl Into<String>) {
        lock(&self.permanent_failures).insert(key.into());
    }

    pub fn fail_times(&self, key: impl Into<String>, times: u32) {
        lock(&self.transient_failures).insert(key.into(), times);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of embed and embed_existing attempts so far
    pub fn embed_calls(&self) -> u32 {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn has_index(&self, index: &str) -> bool {
        lock(&self.indexes).contains_key(index)
    }

    pub fn owner_of(&self, index: &str) -> Option<Principal> {
        lock(&self.indexes).get(index).and_then(|i| i.owner.clone())
    }

    pub fn embedded_count(&self, index: &str) -> usize {
        lock(&self.indexes)
            .get(index)
            .map(|i| i.documents.values().filter(|d| d.record.embedded).count())
            .unwrap_or(0)
    }

    async fn enter(&self) -> Result<(), ExternalError> {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ExternalError::Unavailable("embedding service offline".to_string()));
        }
        Ok(())
    }

    fn injected_failure(&self, keys: &[&str]) -> Option<ExternalError> {
        if keys
            .iter()
            .any(|k| lock(&self.permanent_failures).contains(*k))
        {
            return Some(ExternalError::Rejected("document cannot be embedded".to_string()));
        }

        let mut transient = lock(&self.transient_failures);
        for key in keys {
            if let Some(remaining) = transient.get_mut(*key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Some(ExternalError::Server {
                        status: 503,
                        message: "embedding backend busy".to_string(),
                    });
                }
            }
        }
        None
    }

    fn store(&self, index: &str, document: &NewDocument, embedded: bool) -> Result<String, ExternalError> {
        let mut indexes = lock(&self.indexes);
        let target = indexes
            .get_mut(index)
            .ok_or_else(|| ExternalError::NotFound(format!("index {}", index)))?;

        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        target.documents.insert(
            id.clone(),
            StoredDocument {
                record: DocumentRecord {
                    id: id.clone(),
                    title: document.title.clone(),
                    content_type: document.content_type.clone(),
                    source_url: document.source_url.clone(),
                    author: document.author.clone(),
                    tags: document.tags.clone(),
                    checksum: Some(document.checksum()),
                    embedded,
                    created_at: Utc::now(),
                },
                content: document.content.clone(),
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl EmbeddingService for MemoryEmbeddingService {
    async fn create_index(&self, collection_id: Uuid, _name: &str) -> Result<String, ExternalError> {
        self.enter().await?;
        let index = format!("index-{}", collection_id.simple());
        lock(&self.indexes).entry(index.clone()).or_default();
        Ok(index)
    }

    async fn delete_index(&self, index: &str) -> Result<(), ExternalError> {
        self.enter().await?;
        lock(&self.indexes)
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| ExternalError::NotFound(format!("index {}", index)))
    }

    async fn add_document(&self, index: &str, document: &NewDocument) -> Result<String, ExternalError> {
        self.enter().await?;
        self.store(index, document, false)
    }

    async fn embed(&self, index: &str, document: &NewDocument) -> Result<String, ExternalError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if let Some(err) = self.injected_failure(&[document.title.as_str()]) {
            return Err(err);
        }
        self.store(index, document, true)
    }

    async fn embed_existing(&self, index: &str, document_id: &str) -> Result<(), ExternalError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let title = {
            let indexes = lock(&self.indexes);
            let target = indexes
                .get(index)
                .ok_or_else(|| ExternalError::NotFound(format!("index {}", index)))?;
            target
                .documents
                .get(document_id)
                .map(|d| d.record.title.clone())
                .ok_or_else(|| ExternalError::NotFound(format!("document {}", document_id)))?
        };

        if let Some(err) = self.injected_failure(&[document_id, title.as_str()]) {
            return Err(err);
        }

        let mut indexes = lock(&self.indexes);
        if let Some(doc) = indexes
            .get_mut(index)
            .and_then(|i| i.documents.get_mut(document_id))
        {
            doc.record.embedded = true;
        }
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, ExternalError> {
        self.enter().await?;
        let indexes = lock(&self.indexes);
        let target = indexes
            .get(index)
            .ok_or_else(|| ExternalError::NotFound(format!("index {}", index)))?;
        Ok(target.documents.get(document_id).map(|d| d.record.clone()))
    }

    async fn search(&self, index: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>, ExternalError> {
        self.enter().await?;
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let indexes = lock(&self.indexes);
        let target = indexes
            .get(index)
            .ok_or_else(|| ExternalError::NotFound(format!("index {}", index)))?;

        let mut hits: Vec<SearchHit> = target
            .documents
            .values()
            .filter(|d| d.record.embedded)
            .filter_map(|d| {
                let haystack = format!("{} {}", d.record.title, d.content).to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (matched > 0).then(|| SearchHit {
                    document_id: d.record.id.clone(),
                    title: d.record.title.clone(),
                    snippet: d.content.chars().take(160).collect(),
                    score: matched as f64 / terms.len() as f64,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn transfer_owner(&self, index: &str, new_owner: &Principal) -> Result<(), ExternalError> {
        self.enter().await?;
        let mut indexes = lock(&self.indexes);
        let target = indexes
            .get_mut(index)
            .ok_or_else(|| ExternalError::NotFound(format!("index {}", index)))?;
        target.owner = Some(new_owner.clone());
        Ok(())
    }
}

// =============================================================================
// TOKEN LEDGER
// =============================================================================

/// In-memory token balances
#[derive(Default)]
pub struct MemoryTokenLedger {
    balances: Mutex<HashMap<(String, Principal), u128>>,
    supplies: Mutex<HashMap<String, u128>>,
    balance_calls: AtomicU32,
}

impl MemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, token: &str, holder: &Principal, amount: u128) {
        lock(&self.balances).insert((token.to_string(), holder.clone()), amount);
    }

    /// Fix the total supply instead of summing balances
    pub fn set_supply(&self, token: &str, amount: u128) {
        lock(&self.supplies).insert(token.to_string(), amount);
    }

    pub fn balance_calls(&self) -> u32 {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenLedger for MemoryTokenLedger {
    async fn balance_of(&self, token: &str, holder: &Principal) -> Result<u128, ExternalError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(lock(&self.balances)
            .get(&(token.to_string(), holder.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn total_supply(&self, token: &str) -> Result<u128, ExternalError> {
        tokio::task::yield_now().await;
        if let Some(supply) = lock(&self.supplies).get(token) {
            return Ok(*supply);
        }
        Ok(lock(&self.balances)
            .iter()
            .filter(|((t, _), _)| t == token)
            .fold(0u128, |acc, (_, amount)| acc.saturating_add(*amount)))
    }
}

// =============================================================================
// REMOTE GOVERNANCE
// =============================================================================

/// In-memory remote governance system whose decisions are set by hand
#[derive(Default)]
pub struct MemoryRemoteGovernance {
    proposals: Mutex<HashMap<String, RemoteDecision>>,
    next_id: AtomicU64,
    status_calls: AtomicU32,
}

impl MemoryRemoteGovernance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_decision(&self, external_id: &str, decision: RemoteDecision) {
        lock(&self.proposals).insert(external_id.to_string(), decision);
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteGovernance for MemoryRemoteGovernance {
    async fn submit(&self, governance: &str, _title: &str, _summary: &str) -> Result<String, ExternalError> {
        tokio::task::yield_now().await;
        let id = format!("{}-{}", governance, self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.proposals).insert(id.clone(), RemoteDecision::Open);
        Ok(id)
    }

    async fn get_status(&self, _governance: &str, external_id: &str) -> Result<RemoteDecision, ExternalError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        lock(&self.proposals)
            .get(external_id)
            .copied()
            .ok_or_else(|| ExternalError::NotFound(format!("remote proposal {}", external_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_staged_documents_become_searchable_once_embedded() {
        let service = MemoryEmbeddingService::new();
        let index = service.create_index(Uuid::new_v4(), "Library").await.unwrap();

        let id = service
            .add_document(&index, &NewDocument::new("Rust ownership", "borrowing rules"))
            .await
            .unwrap();
        assert!(service.search(&index, "borrowing", 5).await.unwrap().is_empty());

        service.embed_existing(&index, &id).await.unwrap();
        let hits = service.search(&index, "borrowing", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, id);
        assert_eq!(service.embedded_count(&index), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let service = MemoryEmbeddingService::new();
        let index = service.create_index(Uuid::new_v4(), "Library").await.unwrap();
        service.fail_times("Flaky", 1);

        let doc = NewDocument::new("Flaky", "content");
        let first = assert_err!(service.embed(&index, &doc).await);
        assert!(first.is_retryable());
        assert_ok!(service.embed(&index, &doc).await);
        assert_eq!(service.embed_calls(), 2);
    }

    #[tokio::test]
    async fn test_ledger_supply_defaults_to_sum_of_balances() {
        let ledger = MemoryTokenLedger::new();
        let alice = Principal::parse("alice").unwrap();
        let bob = Principal::parse("bob").unwrap();
        ledger.set_balance("tok", &alice, 30);
        ledger.set_balance("tok", &bob, 70);

        assert_eq!(ledger.total_supply("tok").await.unwrap(), 100);
        ledger.set_supply("tok", 1000);
        assert_eq!(ledger.total_supply("tok").await.unwrap(), 1000);
        assert_eq!(ledger.balance_of("other", &alice).await.unwrap(), 0);
    }
}
