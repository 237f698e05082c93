//! Collection route handlers

use crate::auth::Principal;
use crate::collection::{CollectionConfig, CollectionMetrics, CollectionSummary, CollectionUpdate};
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::debug;
use uuid::Uuid;

/// Create a collection; the caller becomes its creator and an admin
pub async fn create_collection(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CollectionConfig>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<CollectionSummary>>)> {
    debug!("Creating collection '{}' for {}", payload.name, principal);

    let summary = state.engine.create_collection(&principal, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Collection created successfully.",
            summary,
        )),
    ))
}

pub async fn list_collections(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<Vec<CollectionSummary>>>> {
    let collections = state.engine.list_collections().await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} collections found.", collections.len()),
        collections,
    )))
}

pub async fn get_collection(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<CollectionSummary>>> {
    let summary = state.engine.get_collection(id).await?;
    Ok(Json(SuccessResponse::with_data("Collection found.", summary)))
}

pub async fn update_collection(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CollectionUpdate>,
) -> ApiResult<Json<SuccessResponse<CollectionSummary>>> {
    let summary = state
        .engine
        .update_collection(id, &principal, payload)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Collection updated successfully.",
        summary,
    )))
}

pub async fn delete_collection(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<()>>> {
    state.engine.delete_collection(id, &principal).await?;
    Ok(Json(SuccessResponse::message_only(
        "Collection deleted successfully.",
    )))
}

pub async fn collection_metrics(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<CollectionMetrics>>> {
    let metrics = state.engine.collection_metrics(id).await?;
    Ok(Json(SuccessResponse::with_data("Collection metrics.", metrics)))
}
