//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::governance::GovernanceEngine;
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Collections, proposals and the services they call
    pub engine: GovernanceEngine,

    /// Present only when DATABASE_URL is configured
    pub db_pool: Option<Pool>,
}

impl AppState {
    pub fn new(engine: GovernanceEngine, db_pool: Option<Pool>) -> Self {
        Self { engine, db_pool }
    }

    pub fn storage_label(&self) -> &'static str {
        if self.db_pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
