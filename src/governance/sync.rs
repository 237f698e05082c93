//! Linking proposals to an external governance system and pulling its decision

use super::strategy::Tally;
use super::{apply_tally, GovernanceEngine};
use crate::audit::{proposal_resource_id, AuditAction, RESOURCE_PROPOSAL};
use crate::auth::Principal;
use crate::collection::{Collection, GovernanceModel};
use crate::error::{invalid_input, invalid_operation, not_authorized, AppError};
use crate::external::RemoteDecision;
use crate::proposal::{Proposal, ProposalId, ProposalStatus};
use tracing::{debug, info};
use uuid::Uuid;

impl From<RemoteDecision> for Tally {
    fn from(decision: RemoteDecision) -> Self {
        match decision {
            RemoteDecision::Open => Tally::Pending,
            RemoteDecision::Adopted | RemoteDecision::Executed => Tally::Approved,
            RemoteDecision::Rejected | RemoteDecision::Failed => Tally::Rejected,
        }
    }
}

/// Checks shared by linking and submitting. Returns the SNS reference.
fn check_linkable(
    collection: &Collection,
    proposal_id: ProposalId,
    caller: &Principal,
) -> Result<String, AppError> {
    let governance = match (&collection.governance, &collection.sns_governance) {
        (GovernanceModel::SnsIntegrated, Some(reference)) => reference.clone(),
        _ => {
            return Err(invalid_operation(
                "Only SNS-integrated collections link to external governance",
            ))
        }
    };
    if !collection.is_admin(caller) {
        return Err(not_authorized("Only admins can link external proposals"));
    }

    let proposal = collection.proposals.get(proposal_id)?;
    if let Some(existing) = &proposal.external_id {
        return Err(invalid_operation(format!(
            "Proposal {} is already linked to {}",
            proposal_id, existing
        )));
    }
    if proposal.status.is_terminal() {
        return Err(invalid_operation(format!(
            "Proposal {} is {} and can no longer be linked",
            proposal_id, proposal.status
        )));
    }
    Ok(governance)
}

impl GovernanceEngine {
    /// Attach an external proposal id. Set once, never replaced.
    pub async fn link_external_id(
        &self,
        collection_id: Uuid,
        proposal_id: ProposalId,
        caller: &Principal,
        external_id: String,
    ) -> Result<Proposal, AppError> {
        let external_id = external_id.trim().to_string();
        if external_id.is_empty() {
            return Err(invalid_input("External id must not be empty"));
        }

        let now = self.now();
        let proposal = self
            .registry
            .update(collection_id, now, |c| {
                check_linkable(c, proposal_id, caller)?;
                let proposal = c.proposals.get_mut(proposal_id)?;
                proposal.external_id = Some(external_id.clone());
                proposal.updated_at = now;
                Ok(proposal.clone())
            })
            .await?;

        self.audit
            .record(
                Some(caller),
                AuditAction::ExternalLinked,
                RESOURCE_PROPOSAL,
                proposal_resource_id(collection_id, proposal_id),
                Some(serde_json::json!({ "externalId": external_id })),
            )
            .await;
        info!(
            "🔗 Proposal {} in {} linked to external proposal {}",
            proposal_id, collection_id, external_id
        );
        Ok(proposal)
    }

    /// Open a matching proposal in the external system and link it
    pub async fn submit_external(
        &self,
        collection_id: Uuid,
        proposal_id: ProposalId,
        caller: &Principal,
    ) -> Result<Proposal, AppError> {
        let (governance, title, summary) = self
            .registry
            .read(collection_id, self.now(), |c| {
                let governance = check_linkable(c, proposal_id, caller)?;
                let proposal = c.proposals.get(proposal_id)?;
                Ok((
                    governance,
                    format!("{}: {}", c.name, proposal.proposal_type.description()),
                    proposal.description.clone(),
                ))
            })
            .await?;

        let external_id = self
            .services
            .remote
            .submit(&governance, &title, &summary)
            .await?;

        self.link_external_id(collection_id, proposal_id, caller, external_id)
            .await
    }

    /// Pull the external decision and apply it. Terminal proposals are
    /// returned untouched without contacting the external system.
    pub async fn sync_status(
        &self,
        collection_id: Uuid,
        proposal_id: ProposalId,
    ) -> Result<Proposal, AppError> {
        let target = self
            .registry
            .read(collection_id, self.now(), |c| {
                let proposal = c.proposals.get(proposal_id)?;
                if proposal.status.is_terminal() {
                    return Ok(Err(proposal.clone()));
                }
                let governance = match (&c.governance, &c.sns_governance) {
                    (GovernanceModel::SnsIntegrated, Some(reference)) => reference.clone(),
                    _ => {
                        return Err(invalid_operation(
                            "Only SNS-integrated collections sync with external governance",
                        ))
                    }
                };
                let external_id = proposal.external_id.clone().ok_or_else(|| {
                    invalid_operation(format!(
                        "Proposal {} is not linked to an external proposal",
                        proposal_id
                    ))
                })?;
                Ok(Ok((governance, external_id)))
            })
            .await?;

        let (governance, external_id) = match target {
            Ok(target) => target,
            Err(settled) => {
                debug!("Proposal {} is {}; nothing to sync", proposal_id, settled.status);
                return Ok(settled);
            }
        };

        let decision = self
            .services
            .remote
            .get_status(&governance, &external_id)
            .await?;

        let now = self.now();
        let (proposal, transition) = self
            .registry
            .update(collection_id, now, |c| {
                let proposal = c.proposals.get_mut(proposal_id)?;
                // The proposal may have expired or been decided while we waited
                let transition = apply_tally(proposal, decision.into(), now)?;
                Ok((proposal.clone(), transition))
            })
            .await?;

        if let Some(status) = transition {
            let resource = proposal_resource_id(collection_id, proposal_id);
            self.audit
                .record(
                    None,
                    AuditAction::ExternalSynced,
                    RESOURCE_PROPOSAL,
                    resource.clone(),
                    Some(serde_json::json!({ "decision": decision, "status": status })),
                )
                .await;
            let action = match status {
                ProposalStatus::Rejected => AuditAction::ProposalRejected,
                _ => AuditAction::ProposalApproved,
            };
            self.audit
                .record(None, action, RESOURCE_PROPOSAL, resource, None)
                .await;
            info!(
                "🔄 Proposal {} in {} is now {} after external decision {:?}",
                proposal_id, collection_id, status, decision
            );
        }

        Ok(proposal)
    }
}
