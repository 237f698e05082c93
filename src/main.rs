//! Codex API - Governed Document Collections
//!
//! Shared knowledge bases whose contents and settings change only through
//! proposals. Each collection picks a governance model:
//! - Permissionless: any proposal is approved on creation
//! - Multisig: a threshold of admin approvals
//! - Token-based: a quorum of token-weighted votes
//! - SNS-integrated: decisions are pulled from an external governance system
//!
//! Approved proposals are executed against the embedding service that holds
//! the collection's documents.

mod audit;
mod auth;
mod clock;
mod collection;
mod config;
mod db;
mod error;
mod external;
mod governance;
mod models;
mod proposal;
mod routes;
mod state;

use crate::audit::AuditLog;
use crate::clock::SystemClock;
use crate::collection::CollectionRegistry;
use crate::config::{ServicesConfig, Settings};
use crate::db::CollectionRepository;
use crate::external::http::{HttpEmbeddingService, HttpRemoteGovernance, HttpTokenLedger};
use crate::external::memory::{MemoryEmbeddingService, MemoryRemoteGovernance, MemoryTokenLedger};
use crate::governance::{GovernanceEngine, Services};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Codex - Governed Document Collections...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let services = build_services(&settings.services)?;
    let audit = Arc::new(AuditLog::new());

    // Postgres is optional; without it collections live in memory only
    let (registry, db_pool) = match &settings.database {
        Some(database) => {
            let pool = db::init_pool(database).await?;
            info!("✅ Database pool created successfully");
            db::ensure_schema(&pool).await?;

            let repository = CollectionRepository::new(pool.clone());
            let registry = CollectionRegistry::with_repository(repository, audit.clone()).await?;
            (registry, Some(pool))
        }
        None => {
            warn!("⚠️  DATABASE_URL not set, collections will not survive a restart");
            (CollectionRegistry::new(audit.clone()), None)
        }
    };

    let engine = GovernanceEngine::new(
        registry,
        services,
        Arc::new(SystemClock),
        audit,
        settings.governance.clone(),
    );
    let state = Arc::new(AppState::new(engine, db_pool));
    info!(
        "🗄️  Storage: {} ({} collections)",
        state.storage_label(),
        state.engine.collection_count().await
    );

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints (X-Principal header required under /api):");
    info!("   ─── Collections ───");
    info!("   POST   /api/collections                   - Create a collection");
    info!("   GET    /api/collections                   - List collections");
    info!("   GET    /api/collections/{{id}}              - Get a collection");
    info!("   PUT    /api/collections/{{id}}              - Rename or describe (admin)");
    info!("   DELETE /api/collections/{{id}}              - Delete (admin)");
    info!("   GET    /api/collections/{{id}}/metrics      - Document and search counts");
    info!("");
    info!("   ─── Documents ───");
    info!("   POST   /api/collections/{{id}}/documents          - Stage documents for embedding");
    info!("   POST   /api/collections/{{id}}/documents/search   - Search embedded documents");
    info!("   GET    /api/collections/{{id}}/documents/{{doc}}    - Get a document");
    info!("");
    info!("   ─── Proposals ───");
    info!("   POST   /api/collections/{{id}}/proposals               - Open a proposal");
    info!("   GET    /api/collections/{{id}}/proposals               - List proposals");
    info!("   GET    /api/collections/{{id}}/proposals/{{pid}}         - Get a proposal");
    info!("   POST   /api/collections/{{id}}/proposals/{{pid}}/votes   - Vote");
    info!("   POST   /api/collections/{{id}}/proposals/{{pid}}/execute - Execute");
    info!("");
    info!("   ─── External Governance ───");
    info!("   POST   /api/collections/{{id}}/proposals/{{pid}}/external        - Link external id");
    info!("   POST   /api/collections/{{id}}/proposals/{{pid}}/external/submit - Submit upstream");
    info!("   POST   /api/collections/{{id}}/proposals/{{pid}}/external/sync   - Pull decision");
    info!("");
    info!("   GET    /api/audit                          - Audit log");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,codex_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// HTTP clients for configured services, in-memory stand-ins for the rest
fn build_services(config: &ServicesConfig) -> anyhow::Result<Services> {
    let embeddings: Arc<dyn external::EmbeddingService> = match &config.embedding_url {
        Some(url) => {
            info!("🔌 Embedding service at {}", url);
            Arc::new(HttpEmbeddingService::new(url.clone(), config.timeout)?)
        }
        None => {
            warn!("⚠️  EMBEDDING_SERVICE_URL not set, using in-memory embedding index");
            Arc::new(MemoryEmbeddingService::new())
        }
    };

    let ledger: Arc<dyn external::TokenLedger> = match &config.token_ledger_url {
        Some(url) => {
            info!("🔌 Token ledger at {}", url);
            Arc::new(HttpTokenLedger::new(url.clone(), config.timeout)?)
        }
        None => {
            warn!("⚠️  TOKEN_LEDGER_URL not set, token balances are all zero");
            Arc::new(MemoryTokenLedger::new())
        }
    };

    let remote: Arc<dyn external::RemoteGovernance> = match &config.governance_url {
        Some(url) => {
            info!("🔌 External governance at {}", url);
            Arc::new(HttpRemoteGovernance::new(url.clone(), config.timeout)?)
        }
        None => {
            warn!("⚠️  GOVERNANCE_SERVICE_URL not set, using in-memory governance stand-in");
            Arc::new(MemoryRemoteGovernance::new())
        }
    };

    Ok(Services {
        embeddings,
        ledger,
        remote,
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
