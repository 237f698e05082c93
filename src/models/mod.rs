//! Request and response bodies for the HTTP API
//!
//! Domain types (collections, proposals, documents) serialize directly; this
//! module only holds the envelopes and request shapes around them.

use crate::external::NewDocument;
use crate::proposal::{ProposalStatus, ProposalType, VoteChoice};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl SuccessResponse<()> {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Open a proposal. The change itself is given inline, tagged by `type`:
/// `{"description": "...", "type": "add_admin", "principal": "bob"}`
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    #[serde(default)]
    #[validate(length(max = 4000, message = "Description must be at most 4000 characters"))]
    pub description: String,
    #[serde(flatten)]
    pub change: ProposalType,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub choice: VoteChoice,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LinkExternalRequest {
    #[validate(length(min = 1, max = 256, message = "External id must be between 1 and 256 characters"))]
    pub external_id: String,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000, message = "Query must be between 1 and 1000 characters"))]
    pub query: String,
    #[serde(default = "default_search_limit")]
    #[validate(range(min = 1, max = 50, message = "Limit must be between 1 and 50"))]
    pub limit: usize,
}

/// Upload documents now, embed them once a BatchEmbed proposal passes
#[derive(Debug, Deserialize, Validate)]
pub struct StageDocumentsRequest {
    #[validate(length(min = 1, message = "At least one document is required"))]
    pub documents: Vec<NewDocument>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProposalListQuery {
    pub status: Option<ProposalStatus>,
}

fn default_audit_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(default = "default_audit_limit")]
    #[validate(range(min = 1, max = 1000, message = "Limit must be between 1 and 1000"))]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_proposal_request_reads_inline_change() {
        let body = serde_json::json!({
            "description": "Bring in bob",
            "type": "add_admin",
            "principal": "bob"
        });
        let request: CreateProposalRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.description, "Bring in bob");
        assert_eq!(request.change.kind(), "add_admin");
    }

    #[test]
    fn test_search_limit_defaults_and_bounds() {
        let request: SearchRequest = serde_json::from_value(serde_json::json!({ "query": "tides" })).unwrap();
        assert_eq!(request.limit, 10);
        assert!(request.validate().is_ok());

        let too_many: SearchRequest =
            serde_json::from_value(serde_json::json!({ "query": "tides", "limit": 500 })).unwrap();
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_success_envelope_omits_missing_data() {
        let json = serde_json::to_value(SuccessResponse::message_only("done")).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "message": "done" }));
    }
}
