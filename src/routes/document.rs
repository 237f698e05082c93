//! Document route handlers

use crate::auth::Principal;
use crate::error::{invalid_input, ApiResult};
use crate::external::{DocumentRecord, SearchHit};
use crate::models::{SearchRequest, StageDocumentsRequest, SuccessResponse};
use crate::proposal::Proposal;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

/// Upload documents and open a proposal to embed them
pub async fn stage_documents(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StageDocumentsRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Proposal>>)> {
    payload
        .validate()
        .map_err(|e| invalid_input(e.to_string()))?;

    let count = payload.documents.len();
    let proposal = state
        .engine
        .stage_documents(id, &principal, payload.documents, payload.description)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("{} document(s) staged for proposal {}.", count, proposal.id),
            proposal,
        )),
    ))
}

pub async fn search_documents(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SearchRequest>,
) -> ApiResult<Json<SuccessResponse<Vec<SearchHit>>>> {
    payload
        .validate()
        .map_err(|e| invalid_input(e.to_string()))?;

    let hits = state
        .engine
        .search_documents(id, &payload.query, payload.limit)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} results.", hits.len()),
        hits,
    )))
}

pub async fn get_document(
    State(state): State<SharedState>,
    Path((id, document_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<SuccessResponse<DocumentRecord>>> {
    let document = state.engine.get_document(id, &document_id).await?;
    Ok(Json(SuccessResponse::with_data("Document found.", document)))
}
