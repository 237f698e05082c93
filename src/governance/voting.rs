//! Vote casting and tallying

use super::strategy::{resolve, TallyContext};
use super::{apply_tally, GovernanceEngine};
use crate::audit::{proposal_resource_id, AuditAction, RESOURCE_PROPOSAL};
use crate::auth::Principal;
use crate::collection::Collection;
use crate::error::{invalid_operation, not_authorized, AppError};
use crate::proposal::{CastVote, Proposal, ProposalId, ProposalStatus, VoteChoice};
use tracing::{debug, info};
use uuid::Uuid;

/// Checks that hold before and after any ledger lookup
fn check_open_for(collection: &Collection, proposal_id: ProposalId, voter: &Principal) -> Result<(), AppError> {
    let proposal = collection.proposals.get(proposal_id)?;
    if proposal.status != ProposalStatus::Active {
        return Err(invalid_operation(format!(
            "Proposal {} is {} and no longer accepts votes",
            proposal_id, proposal.status
        )));
    }
    if proposal.votes.contains_key(voter) {
        return Err(invalid_operation(format!(
            "{} has already voted on proposal {}",
            voter, proposal_id
        )));
    }
    Ok(())
}

impl GovernanceEngine {
    pub async fn cast_vote(
        &self,
        collection_id: Uuid,
        proposal_id: ProposalId,
        voter: &Principal,
        choice: VoteChoice,
    ) -> Result<Proposal, AppError> {
        let token = self
            .registry
            .read(collection_id, self.now(), |c| {
                check_open_for(c, proposal_id, voter)?;
                let strategy = resolve(c.governance);
                if strategy.token_weighted {
                    c.governance_token
                        .clone()
                        .map(Some)
                        .ok_or_else(|| AppError::Internal(format!("Collection {} has no governance token", c.id)))
                } else if strategy.is_eligible_voter(c, voter, 0) {
                    Ok(None)
                } else {
                    Err(not_authorized("Not eligible to vote on this proposal"))
                }
            })
            .await?;

        // Weight is the balance right now; the supply is read alongside so the
        // tally compares figures from the same moment
        let (weight, ctx) = match token {
            Some(token) => {
                let (balance, supply) = tokio::try_join!(
                    self.services.ledger.balance_of(&token, voter),
                    self.services.ledger.total_supply(&token),
                )?;
                (
                    balance,
                    TallyContext {
                        total_supply: Some(supply),
                    },
                )
            }
            None => (1, TallyContext::default()),
        };

        let now = self.now();
        let (proposal, transition, advisory) = self
            .registry
            .update(collection_id, now, |c| {
                check_open_for(c, proposal_id, voter)?;
                let strategy = resolve(c.governance);
                if !strategy.is_eligible_voter(c, voter, weight) {
                    return Err(not_authorized("Not eligible to vote on this proposal"));
                }

                let mut proposal = c.proposals.get(proposal_id)?.clone();
                proposal.votes.insert(
                    voter.clone(),
                    CastVote {
                        choice,
                        weight,
                        cast_at: now,
                    },
                );
                proposal.updated_at = now;

                let tally = strategy.tally(c, &proposal, &ctx);
                let transition = apply_tally(&mut proposal, tally, now)?;
                *c.proposals.get_mut(proposal_id)? = proposal.clone();
                Ok((proposal, transition, strategy.advisory_votes))
            })
            .await?;

        let resource = proposal_resource_id(collection_id, proposal_id);
        self.audit
            .record(
                Some(voter),
                AuditAction::VoteCast,
                RESOURCE_PROPOSAL,
                resource.clone(),
                Some(serde_json::json!({ "choice": choice, "weight": weight.to_string() })),
            )
            .await;
        debug!("{} voted {:?} on {}/{}", voter, choice, collection_id, proposal_id);
        if advisory {
            debug!("Vote on {}/{} is advisory; the external decision is authoritative", collection_id, proposal_id);
        }

        if let Some(status) = transition {
            let action = match status {
                ProposalStatus::Rejected => AuditAction::ProposalRejected,
                _ => AuditAction::ProposalApproved,
            };
            self.audit
                .record(None, action, RESOURCE_PROPOSAL, resource, None)
                .await;
            info!("🗳️  Proposal {} in {} is now {}", proposal_id, collection_id, status);
        }

        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{p, Harness};
    use super::*;
    use crate::collection::GovernanceModel;
    use crate::proposal::ProposalType;
    use chrono::Duration;

    async fn open_add_admin(h: &Harness, id: Uuid, creator: &str) -> ProposalId {
        h.engine
            .create_proposal(id, &p(creator), String::new(), ProposalType::AddAdmin { principal: p("zed") })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_multisig_approves_at_threshold() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob", "carol"], 2, 50).await;
        let pid = open_add_admin(&h, id, "alice").await;

        let after_one = h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::Yes).await.unwrap();
        assert_eq!(after_one.status, ProposalStatus::Active);

        let after_two = h.engine.cast_vote(id, pid, &p("bob"), VoteChoice::Yes).await.unwrap();
        assert_eq!(after_two.status, ProposalStatus::Approved);

        // Approved proposals take no further votes
        let err = h.engine.cast_vote(id, pid, &p("carol"), VoteChoice::No).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_vote_is_rejected_and_not_overwritten() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob", "carol"], 3, 50).await;
        let pid = open_add_admin(&h, id, "alice").await;

        h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::No).await.unwrap();
        let err = h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::Yes).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));

        let proposal = h.engine.get_proposal(id, pid).await.unwrap();
        assert_eq!(proposal.votes[&p("alice")].choice, VoteChoice::No);
    }

    #[tokio::test]
    async fn test_non_admin_cannot_vote_in_multisig() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 2, 50).await;
        let pid = open_add_admin(&h, id, "alice").await;

        let err = h.engine.cast_vote(id, pid, &p("mallory"), VoteChoice::Yes).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_token_weighted_quorum() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::TokenBased, &["alice"], 1, 50).await;
        h.ledger.set_supply("gov-token", 1000);
        h.ledger.set_balance("gov-token", &p("whale"), 499);
        h.ledger.set_balance("gov-token", &p("minnow"), 1);

        let pid = open_add_admin(&h, id, "alice").await;

        let after_whale = h.engine.cast_vote(id, pid, &p("whale"), VoteChoice::Yes).await.unwrap();
        assert_eq!(after_whale.status, ProposalStatus::Active);
        assert_eq!(after_whale.votes[&p("whale")].weight, 499);

        let after_minnow = h.engine.cast_vote(id, pid, &p("minnow"), VoteChoice::Yes).await.unwrap();
        assert_eq!(after_minnow.status, ProposalStatus::Approved);
    }

    #[tokio::test]
    async fn test_zero_balance_cannot_vote() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::TokenBased, &["alice"], 1, 50).await;
        h.ledger.set_supply("gov-token", 1000);
        let pid = open_add_admin(&h, id, "alice").await;

        let err = h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::Yes).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
        assert!(h.engine.get_proposal(id, pid).await.unwrap().votes.is_empty());
    }

    #[tokio::test]
    async fn test_vote_after_expiry_fails_and_status_reads_expired() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::Multisig, &["alice", "bob"], 2, 50).await;
        let pid = open_add_admin(&h, id, "alice").await;

        h.clock.advance(Duration::days(7) + Duration::seconds(1));

        let err = h.engine.cast_vote(id, pid, &p("bob"), VoteChoice::Yes).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));

        let proposal = h.engine.get_proposal(id, pid).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Expired);
        assert!(proposal.votes.is_empty());

        let expired = h
            .engine
            .audit()
            .query(Some(RESOURCE_PROPOSAL), Some(&proposal_resource_id(id, pid)), 10)
            .await;
        assert!(expired.iter().any(|e| e.action == AuditAction::ProposalExpired));
    }

    #[tokio::test]
    async fn test_sns_votes_are_recorded_but_do_not_decide() {
        let h = Harness::new();
        let id = h.collection(GovernanceModel::SnsIntegrated, &["alice", "bob"], 1, 50).await;
        let pid = open_add_admin(&h, id, "alice").await;

        h.engine.cast_vote(id, pid, &p("alice"), VoteChoice::Yes).await.unwrap();
        let proposal = h.engine.cast_vote(id, pid, &p("bob"), VoteChoice::Yes).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Active);
        assert_eq!(proposal.votes.len(), 2);
    }
}
