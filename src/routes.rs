//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod audit;
mod collection;
mod document;
mod proposal;

use crate::auth::principal_middleware;
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware_stack = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Everything under /api needs a caller principal
    let api = Router::new()
        // Collections
        .route(
            "/collections",
            post(collection::create_collection).get(collection::list_collections),
        )
        .route(
            "/collections/{id}",
            get(collection::get_collection)
                .put(collection::update_collection)
                .delete(collection::delete_collection),
        )
        .route("/collections/{id}/metrics", get(collection::collection_metrics))

        // Documents
        .route("/collections/{id}/documents", post(document::stage_documents))
        .route("/collections/{id}/documents/search", post(document::search_documents))
        .route(
            "/collections/{id}/documents/{document_id}",
            get(document::get_document),
        )

        // Proposals
        .route(
            "/collections/{id}/proposals",
            post(proposal::create_proposal).get(proposal::list_proposals),
        )
        .route(
            "/collections/{id}/proposals/{proposal_id}",
            get(proposal::get_proposal),
        )
        .route(
            "/collections/{id}/proposals/{proposal_id}/votes",
            post(proposal::cast_vote),
        )
        .route(
            "/collections/{id}/proposals/{proposal_id}/execute",
            post(proposal::execute_proposal),
        )

        // External governance
        .route(
            "/collections/{id}/proposals/{proposal_id}/external",
            post(proposal::link_external),
        )
        .route(
            "/collections/{id}/proposals/{proposal_id}/external/submit",
            post(proposal::submit_external),
        )
        .route(
            "/collections/{id}/proposals/{proposal_id}/external/sync",
            post(proposal::sync_external),
        )

        // Audit
        .route("/audit", get(audit::list_audit_entries))
        .layer(middleware::from_fn(principal_middleware));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api)

        // Apply middleware and state
        .layer(middleware_stack)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let principal = HeaderName::from_static(crate::auth::PRINCIPAL_HEADER);
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, principal])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::clock::SystemClock;
    use crate::collection::CollectionRegistry;
    use crate::config::{CorsConfig, GovernanceConfig, ServerConfig, ServicesConfig};
    use crate::external::memory::{MemoryEmbeddingService, MemoryRemoteGovernance, MemoryTokenLedger};
    use crate::governance::{GovernanceEngine, Services};
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let audit = Arc::new(AuditLog::new());
        let engine = GovernanceEngine::new(
            CollectionRegistry::new(audit.clone()),
            Services {
                embeddings: Arc::new(MemoryEmbeddingService::new()),
                ledger: Arc::new(MemoryTokenLedger::new()),
                remote: Arc::new(MemoryRemoteGovernance::new()),
            },
            Arc::new(SystemClock),
            audit,
            GovernanceConfig::default(),
        );
        let settings = Settings {
            server: ServerConfig::default(),
            database: None,
            cors: CorsConfig::default(),
            services: ServicesConfig::default(),
            governance: GovernanceConfig::default(),
        };
        create_router(Arc::new(AppState::new(engine, None)), &settings)
    }

    fn json_request(method: Method, uri: &str, principal: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(principal) = principal {
            builder = builder.header(crate::auth::PRINCIPAL_HEADER, principal);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_principal() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_rejects_missing_principal() {
        let response = app()
            .oneshot(Request::builder().uri("/api/collections").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_collection_and_proposal_flow() {
        let app = app();

        let created = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/collections",
                Some("alice"),
                json!({ "name": "Handbook", "governance": "multisig", "admins": ["bob"], "threshold": 2 }),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let body = read_json(created).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let proposal = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/collections/{}/proposals", id),
                Some("alice"),
                json!({ "type": "add_admin", "principal": "carol" }),
            ))
            .await
            .unwrap();
        assert_eq!(proposal.status(), StatusCode::CREATED);
        let body = read_json(proposal).await;
        assert_eq!(body["data"]["status"], "active");

        let outsider = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/collections/{}/proposals/1/votes", id),
                Some("mallory"),
                json!({ "choice": "yes" }),
            ))
            .await
            .unwrap();
        assert_eq!(outsider.status(), StatusCode::FORBIDDEN);

        for voter in ["alice", "bob"] {
            let vote = app
                .clone()
                .oneshot(json_request(
                    Method::POST,
                    &format!("/api/collections/{}/proposals/1/votes", id),
                    Some(voter),
                    json!({ "choice": "yes" }),
                ))
                .await
                .unwrap();
            assert_eq!(vote.status(), StatusCode::OK);
        }

        let executed = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/api/collections/{}/proposals/1/execute", id),
                Some("bob"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(executed.status(), StatusCode::OK);
        assert_eq!(read_json(executed).await["data"]["status"], "executed");

        let again = app
            .oneshot(json_request(
                Method::POST,
                &format!("/api/collections/{}/proposals/1/execute", id),
                Some("bob"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);
    }
}
