//! Proposal creation and lookup

use super::executor::apply_local_effect;
use super::strategy::{resolve, TallyContext};
use super::{apply_tally, GovernanceEngine};
use crate::audit::{proposal_resource_id, AuditAction, RESOURCE_PROPOSAL};
use crate::auth::Principal;
use crate::collection::GovernanceModel;
use crate::error::{invalid_input, not_authorized, AppError};
use crate::proposal::{Proposal, ProposalId, ProposalStatus, ProposalSummary, ProposalType};
use tracing::info;
use uuid::Uuid;

const MAX_DESCRIPTION: usize = 4000;

impl GovernanceEngine {
    pub async fn create_proposal(
        &self,
        collection_id: Uuid,
        creator: &Principal,
        description: String,
        proposal_type: ProposalType,
    ) -> Result<Proposal, AppError> {
        proposal_type
            .check_shape(self.config.max_documents_per_proposal)
            .map_err(invalid_input)?;

        let description = match description.trim() {
            "" => proposal_type.description(),
            text if text.chars().count() > MAX_DESCRIPTION => {
                return Err(invalid_input(format!(
                    "Description must be at most {} characters",
                    MAX_DESCRIPTION
                )))
            }
            text => text.to_string(),
        };

        // Admins never need a ledger lookup; token holders do
        let token_to_check = self
            .registry
            .read(collection_id, self.now(), |c| {
                check_type_fits_model(&proposal_type, c.governance)?;
                let strategy = resolve(c.governance);
                if c.is_admin(creator) || !strategy.token_weighted {
                    Ok(None)
                } else {
                    Ok(c.governance_token.clone())
                }
            })
            .await?;

        let balance = match token_to_check {
            Some(token) => self.services.ledger.balance_of(&token, creator).await?,
            None => 0,
        };

        let now = self.now();
        let voting_window = self.config.voting_window;
        let auto_execute = self.config.auto_execute_permissionless;
        let (proposal, governance) = self
            .registry
            .update(collection_id, now, |c| {
                let strategy = resolve(c.governance);
                if !strategy.can_propose(c, creator, balance) {
                    return Err(not_authorized(
                        "Not allowed to create proposals in this collection",
                    ));
                }

                // Approved at birth: an effect that cannot apply is refused now
                if c.governance == GovernanceModel::Permissionless && auto_execute {
                    let mut preview = c.clone();
                    apply_local_effect(&mut preview, &proposal_type)?;
                }

                let id = c.proposals.allocate_id();
                let mut proposal = Proposal::new(
                    id,
                    creator.clone(),
                    description,
                    proposal_type,
                    now,
                    voting_window,
                );
                let tally = strategy.tally(c, &proposal, &TallyContext::default());
                apply_tally(&mut proposal, tally, now)?;
                c.proposals.insert(proposal.clone())?;
                Ok((proposal, c.governance))
            })
            .await?;

        let resource = proposal_resource_id(collection_id, proposal.id);
        self.audit
            .record(
                Some(creator),
                AuditAction::ProposalCreated,
                RESOURCE_PROPOSAL,
                resource.clone(),
                Some(serde_json::json!({
                    "kind": proposal.proposal_type.kind(),
                    "status": proposal.status,
                })),
            )
            .await;
        info!(
            "📝 Proposal {} ({}) opened in collection {}",
            proposal.id,
            proposal.proposal_type.kind(),
            collection_id
        );

        if proposal.status == ProposalStatus::Approved {
            self.audit
                .record(None, AuditAction::ProposalApproved, RESOURCE_PROPOSAL, resource, None)
                .await;

            if governance == GovernanceModel::Permissionless && auto_execute {
                return self.execute_proposal(collection_id, proposal.id, creator).await;
            }
        }

        Ok(proposal)
    }

    pub async fn get_proposal(
        &self,
        collection_id: Uuid,
        proposal_id: ProposalId,
    ) -> Result<Proposal, AppError> {
        self.registry
            .read(collection_id, self.now(), |c| {
                c.proposals.get(proposal_id).cloned()
            })
            .await
    }

    pub async fn list_proposals(
        &self,
        collection_id: Uuid,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<ProposalSummary>, AppError> {
        self.registry
            .read(collection_id, self.now(), |c| {
                Ok(c.proposals
                    .list(status)
                    .into_iter()
                    .map(Proposal::summary)
                    .collect())
            })
            .await
    }
}

/// Parameter changes only make sense for the model that uses the parameter
fn check_type_fits_model(proposal_type: &ProposalType, model: GovernanceModel) -> Result<(), AppError> {
    match proposal_type {
        ProposalType::ChangeThreshold { .. } if model != GovernanceModel::Multisig => Err(
            invalid_input("Threshold changes only apply to multisig collections"),
        ),
        ProposalType::UpdateQuorum { .. } if model != GovernanceModel::TokenBased => Err(
            invalid_input("Quorum changes only apply to token-based collections"),
        ),
        _ => Ok(()),
    }
}
