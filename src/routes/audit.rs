//! Audit log route handlers

use crate::audit::AuditEntry;
use crate::error::{invalid_input, ApiResult};
use crate::models::{AuditQuery, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};
use validator::Validate;

/// Newest entries first, optionally narrowed to one resource
pub async fn list_audit_entries(
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<AuditEntry>>>> {
    query
        .validate()
        .map_err(|e| invalid_input(e.to_string()))?;

    let entries = state
        .engine
        .audit()
        .query(
            query.resource_type.as_deref(),
            query.resource_id.as_deref(),
            query.limit,
        )
        .await;

    Ok(Json(SuccessResponse::with_data(
        format!("{} audit entries.", entries.len()),
        entries,
    )))
}
