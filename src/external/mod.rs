//! Remote collaborators
//!
//! The embedding/search service, the token ledger and the remote governance
//! system are consumed through the traits below. `http` talks to real
//! deployments; `memory` holds in-process stand-ins used in development and
//! tests.

pub mod http;
pub mod memory;

use crate::auth::Principal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by remote services
#[derive(Error, Debug, Clone)]
pub enum ExternalError {
    /// Could not reach the service or it timed out
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a server-side failure
    #[error("service failed with status {status}: {message}")]
    Server { status: u16, message: String },

    /// The service refused the request; retrying will not help
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ExternalError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExternalError::Unavailable(_) | ExternalError::Server { .. })
    }
}

/// Document submitted for indexing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            content_type: None,
            source_url: None,
            author: None,
            tags: Vec::new(),
        }
    }

    /// Hex sha256 of the content, used to detect duplicate uploads
    pub fn checksum(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.content.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Document metadata held by the embedding service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub embedded: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub document_id: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

/// Decision reported by the remote governance system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteDecision {
    Open,
    Adopted,
    Executed,
    Rejected,
    Failed,
}

/// Index, embed and search documents
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Provision an index for a new collection, returning its remote id
    async fn create_index(&self, collection_id: Uuid, name: &str) -> Result<String, ExternalError>;

    async fn delete_index(&self, index: &str) -> Result<(), ExternalError>;

    /// Store a document without embedding it
    async fn add_document(&self, index: &str, document: &NewDocument) -> Result<String, ExternalError>;

    /// Store and embed a document in one call
    async fn embed(&self, index: &str, document: &NewDocument) -> Result<String, ExternalError>;

    /// Embed a document previously stored with `add_document`
    async fn embed_existing(&self, index: &str, document_id: &str) -> Result<(), ExternalError>;

    async fn get_document(
        &self,
        index: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, ExternalError>;

    async fn search(&self, index: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>, ExternalError>;

    /// Tell the service who owns an index now
    async fn transfer_owner(&self, index: &str, new_owner: &Principal) -> Result<(), ExternalError>;
}

/// Read-only view of a governance token
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn balance_of(&self, token: &str, holder: &Principal) -> Result<u128, ExternalError>;

    async fn total_supply(&self, token: &str) -> Result<u128, ExternalError>;
}

/// Delegated decision making for SNS-integrated collections
#[async_trait]
pub trait RemoteGovernance: Send + Sync {
    /// Open a proposal remotely, returning its external id
    async fn submit(&self, governance: &str, title: &str, summary: &str) -> Result<String, ExternalError>;

    async fn get_status(&self, governance: &str, external_id: &str) -> Result<RemoteDecision, ExternalError>;
}
