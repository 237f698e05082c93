//! HTTP clients for the remote collaborators

use super::*;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Shared plumbing: base URL handling and status mapping
#[derive(Clone)]
struct HttpService {
    client: Client,
    base: Url,
}

impl HttpService {
    fn new(base: Url, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ExternalError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ExternalError::Rejected(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn transport(e: reqwest::Error) -> ExternalError {
    ExternalError::Unavailable(e.to_string())
}

async fn check(response: Response) -> Result<Response, ExternalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ExternalError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ExternalError::Unavailable(format!("{}: {}", status, message))
        }
        s if s.is_server_error() => ExternalError::Server {
            status: s.as_u16(),
            message,
        },
        _ => ExternalError::Rejected(format!("{}: {}", status, message)),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExternalError> {
    check(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ExternalError::Decode(e.to_string()))
}

/// Token amounts may exceed JSON's safe integer range, so ledgers send them as strings
fn parse_amount(value: &Value) -> Result<u128, ExternalError> {
    match value {
        Value::String(s) => s
            .parse::<u128>()
            .map_err(|e| ExternalError::Decode(format!("invalid amount '{}': {}", s, e))),
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| ExternalError::Decode(format!("invalid amount {}", n))),
        other => Err(ExternalError::Decode(format!("invalid amount {}", other))),
    }
}

// =============================================================================
// EMBEDDING SERVICE
// =============================================================================

pub struct HttpEmbeddingService {
    http: HttpService,
}

impl HttpEmbeddingService {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            http: HttpService::new(base, timeout)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexCreated {
    index_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentCreated {
    document_id: String,
}

#[derive(Deserialize)]
struct SearchResults {
    results: Vec<SearchHit>,
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn create_index(&self, collection_id: Uuid, name: &str) -> Result<String, ExternalError> {
        let url = self.http.endpoint(&["indexes"])?;
        let response = self
            .http
            .client
            .post(url)
            .json(&json!({ "collectionId": collection_id, "name": name }))
            .send()
            .await
            .map_err(transport)?;
        Ok(decode::<IndexCreated>(response).await?.index_id)
    }

    async fn delete_index(&self, index: &str) -> Result<(), ExternalError> {
        let url = self.http.endpoint(&["indexes", index])?;
        let response = self.http.client.delete(url).send().await.map_err(transport)?;
        check(response).await.map(|_| ())
    }

    async fn add_document(&self, index: &str, document: &NewDocument) -> Result<String, ExternalError> {
        let url = self.http.endpoint(&["indexes", index, "documents"])?;
        let response = self
            .http
            .client
            .post(url)
            .json(document)
            .send()
            .await
            .map_err(transport)?;
        Ok(decode::<DocumentCreated>(response).await?.document_id)
    }

    async fn embed(&self, index: &str, document: &NewDocument) -> Result<String, ExternalError> {
        let url = self.http.endpoint(&["indexes", index, "documents", "embed"])?;
        let response = self
            .http
            .client
            .post(url)
            .json(document)
            .send()
            .await
            .map_err(transport)?;
        Ok(decode::<DocumentCreated>(response).await?.document_id)
    }

    async fn embed_existing(&self, index: &str, document_id: &str) -> Result<(), ExternalError> {
        let url = self
            .http
            .endpoint(&["indexes", index, "documents", document_id, "embed"])?;
        let response = self.http.client.post(url).send().await.map_err(transport)?;
        check(response).await.map(|_| ())
    }

    async fn get_document(
        &self,
        index: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, ExternalError> {
        let url = self.http.endpoint(&["indexes", index, "documents", document_id])?;
        let response = self.http.client.get(url).send().await.map_err(transport)?;
        match decode::<DocumentRecord>(response).await {
            Ok(record) => Ok(Some(record)),
            Err(ExternalError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search(&self, index: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>, ExternalError> {
        let url = self.http.endpoint(&["indexes", index, "search"])?;
        let response = self
            .http
            .client
            .post(url)
            .json(&json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(transport)?;
        Ok(decode::<SearchResults>(response).await?.results)
    }

    async fn transfer_owner(&self, index: &str, new_owner: &Principal) -> Result<(), ExternalError> {
        let url = self.http.endpoint(&["indexes", index, "owner"])?;
        let response = self
            .http
            .client
            .put(url)
            .json(&json!({ "owner": new_owner }))
            .send()
            .await
            .map_err(transport)?;
        check(response).await.map(|_| ())
    }
}

// =============================================================================
// TOKEN LEDGER
// =============================================================================

pub struct HttpTokenLedger {
    http: HttpService,
}

impl HttpTokenLedger {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            http: HttpService::new(base, timeout)?,
        })
    }
}

#[async_trait]
impl TokenLedger for HttpTokenLedger {
    async fn balance_of(&self, token: &str, holder: &Principal) -> Result<u128, ExternalError> {
        let url = self
            .http
            .endpoint(&["tokens", token, "balances", holder.as_str()])?;
        let response = self.http.client.get(url).send().await.map_err(transport)?;
        let body: Value = decode(response).await?;
        parse_amount(&body["balance"])
    }

    async fn total_supply(&self, token: &str) -> Result<u128, ExternalError> {
        let url = self.http.endpoint(&["tokens", token, "supply"])?;
        let response = self.http.client.get(url).send().await.map_err(transport)?;
        let body: Value = decode(response).await?;
        parse_amount(&body["totalSupply"])
    }
}

// =============================================================================
// REMOTE GOVERNANCE
// =============================================================================

pub struct HttpRemoteGovernance {
    http: HttpService,
}

impl HttpRemoteGovernance {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            http: HttpService::new(base, timeout)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteProposalCreated {
    proposal_id: String,
}

#[derive(Deserialize)]
struct RemoteProposalStatus {
    status: RemoteDecision,
}

#[async_trait]
impl RemoteGovernance for HttpRemoteGovernance {
    async fn submit(&self, governance: &str, title: &str, summary: &str) -> Result<String, ExternalError> {
        let url = self.http.endpoint(&["governance", governance, "proposals"])?;
        let response = self
            .http
            .client
            .post(url)
            .json(&json!({ "title": title, "summary": summary }))
            .send()
            .await
            .map_err(transport)?;
        Ok(decode::<RemoteProposalCreated>(response).await?.proposal_id)
    }

    async fn get_status(&self, governance: &str, external_id: &str) -> Result<RemoteDecision, ExternalError> {
        let url = self
            .http
            .endpoint(&["governance", governance, "proposals", external_id])?;
        let response = self.http.client.get(url).send().await.map_err(transport)?;
        Ok(decode::<RemoteProposalStatus>(response).await?.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}/v1", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_embedding_client_paths_and_status_mapping() {
        let router = Router::new()
            .route(
                "/v1/indexes",
                post(|| async { Json(json!({ "indexId": "idx-1" })) }),
            )
            .route(
                "/v1/indexes/{index}/documents/{id}",
                get(|Path((_, id)): Path<(String, String)>| async move {
                    if id == "known" {
                        Ok(Json(json!({
                            "id": "known",
                            "title": "Charter",
                            "embedded": true,
                            "createdAt": "2026-01-01T00:00:00Z"
                        })))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/v1/indexes/{index}/documents/{id}/embed",
                post(|| async { AxumStatus::SERVICE_UNAVAILABLE }),
            )
            .route(
                "/v1/indexes/{index}/documents/embed",
                post(|| async { (AxumStatus::UNPROCESSABLE_ENTITY, "too large") }),
            );
        let base = serve(router).await;
        let service = HttpEmbeddingService::new(base, Duration::from_secs(5)).unwrap();

        let index = service.create_index(Uuid::new_v4(), "Research").await.unwrap();
        assert_eq!(index, "idx-1");

        let doc = service.get_document("idx-1", "known").await.unwrap().unwrap();
        assert_eq!(doc.title, "Charter");
        assert!(doc.embedded);
        assert!(service.get_document("idx-1", "missing").await.unwrap().is_none());

        let err = service.embed_existing("idx-1", "known").await.unwrap_err();
        assert!(err.is_retryable());

        let err = service
            .embed("idx-1", &NewDocument::new("Big", "..."))
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_ledger_reads_string_amounts() {
        let router = Router::new()
            .route(
                "/v1/tokens/{token}/balances/{holder}",
                get(|| async { Json(json!({ "balance": "340282366920938463463374607431768211455" })) }),
            )
            .route(
                "/v1/tokens/{token}/supply",
                get(|| async { Json(json!({ "totalSupply": 1000 })) }),
            );
        let base = serve(router).await;
        let ledger = HttpTokenLedger::new(base, Duration::from_secs(5)).unwrap();
        let holder = Principal::parse("alice").unwrap();

        assert_eq!(ledger.balance_of("tok", &holder).await.unwrap(), u128::MAX);
        assert_eq!(ledger.total_supply("tok").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_remote_governance_round_trip() {
        let router = Router::new()
            .route(
                "/v1/governance/{gov}/proposals",
                post(|| async { Json(json!({ "proposalId": "77" })) }),
            )
            .route(
                "/v1/governance/{gov}/proposals/{id}",
                get(|| async { Json(json!({ "status": "adopted" })) }),
            );
        let base = serve(router).await;
        let remote = HttpRemoteGovernance::new(base, Duration::from_secs(5)).unwrap();

        let id = remote.submit("sns-gov", "Add admin", "details").await.unwrap();
        assert_eq!(id, "77");
        assert_eq!(
            remote.get_status("sns-gov", &id).await.unwrap(),
            RemoteDecision::Adopted
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let ledger = HttpTokenLedger::new(base, Duration::from_secs(2)).unwrap();
        let err = ledger.total_supply("tok").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
