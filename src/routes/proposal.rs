//! Proposal route handlers
//!
//! Creation, voting, execution and the external governance link.

use crate::auth::Principal;
use crate::error::{invalid_input, ApiResult};
use crate::models::{CreateProposalRequest, LinkExternalRequest, ProposalListQuery, SuccessResponse, VoteRequest};
use crate::proposal::{Proposal, ProposalId, ProposalStatus, ProposalSummary};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

pub async fn create_proposal(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateProposalRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Proposal>>)> {
    payload
        .validate()
        .map_err(|e| invalid_input(e.to_string()))?;

    let proposal = state
        .engine
        .create_proposal(id, &principal, payload.description, payload.change)
        .await?;

    let message = match proposal.status {
        ProposalStatus::Executed => "Proposal created and executed.",
        ProposalStatus::Approved => "Proposal created and approved.",
        _ => "Proposal created successfully.",
    };
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(message, proposal)),
    ))
}

/// List proposals, optionally filtered by `?status=`
pub async fn list_proposals(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProposalListQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<ProposalSummary>>>> {
    let proposals = state.engine.list_proposals(id, query.status).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} proposals found.", proposals.len()),
        proposals,
    )))
}

pub async fn get_proposal(
    State(state): State<SharedState>,
    Path((id, proposal_id)): Path<(Uuid, ProposalId)>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    let proposal = state.engine.get_proposal(id, proposal_id).await?;
    Ok(Json(SuccessResponse::with_data("Proposal found.", proposal)))
}

pub async fn cast_vote(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path((id, proposal_id)): Path<(Uuid, ProposalId)>,
    Json(payload): Json<VoteRequest>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    debug!("{} voting {:?} on {}/{}", principal, payload.choice, id, proposal_id);

    let proposal = state
        .engine
        .cast_vote(id, proposal_id, &principal, payload.choice)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Vote recorded. Proposal is {}.", proposal.status),
        proposal,
    )))
}

pub async fn execute_proposal(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path((id, proposal_id)): Path<(Uuid, ProposalId)>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    let proposal = state
        .engine
        .execute_proposal(id, proposal_id, &principal)
        .await?;

    let message = match proposal.execution.as_ref().map(|r| r.failed()) {
        Some(failed) if failed > 0 => format!("Proposal executed; {} document(s) failed.", failed),
        _ => "Proposal executed successfully.".to_string(),
    };
    Ok(Json(SuccessResponse::with_data(message, proposal)))
}

pub async fn link_external(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path((id, proposal_id)): Path<(Uuid, ProposalId)>,
    Json(payload): Json<LinkExternalRequest>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    payload
        .validate()
        .map_err(|e| invalid_input(e.to_string()))?;

    let proposal = state
        .engine
        .link_external_id(id, proposal_id, &principal, payload.external_id)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "External proposal linked.",
        proposal,
    )))
}

pub async fn submit_external(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path((id, proposal_id)): Path<(Uuid, ProposalId)>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    let proposal = state
        .engine
        .submit_external(id, proposal_id, &principal)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Proposal submitted to external governance.",
        proposal,
    )))
}

pub async fn sync_external(
    State(state): State<SharedState>,
    Path((id, proposal_id)): Path<(Uuid, ProposalId)>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    let proposal = state.engine.sync_status(id, proposal_id).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Proposal is {}.", proposal.status),
        proposal,
    )))
}
