//! Governance strategies
//!
//! Each governance model maps to a fixed table of rule functions. The engine
//! never branches on the model itself; it asks the resolved strategy.

use crate::auth::Principal;
use crate::collection::{Collection, GovernanceModel};
use crate::proposal::{Proposal, VoteChoice};

/// Decision reached by a tally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Pending,
    Approved,
    Rejected,
}

/// Facts a tally may need from outside the collection
#[derive(Debug, Clone, Copy, Default)]
pub struct TallyContext {
    /// Current supply of the governance token, when token voting applies
    pub total_supply: Option<u128>,
}

pub struct Strategy {
    pub model: GovernanceModel,
    /// Votes are weighted by token balance, which must be fetched from the ledger
    pub token_weighted: bool,
    /// Local votes are recorded but never decide the outcome
    pub advisory_votes: bool,
    is_eligible_voter: fn(&Collection, &Principal, u128) -> bool,
    can_propose: fn(&Collection, &Principal, u128) -> bool,
    tally: fn(&Collection, &Proposal, &TallyContext) -> Tally,
    can_execute: fn(&Collection, &Proposal, &Principal) -> bool,
}

impl Strategy {
    /// `token_balance` is only consulted by token-weighted strategies
    pub fn is_eligible_voter(&self, collection: &Collection, voter: &Principal, token_balance: u128) -> bool {
        (self.is_eligible_voter)(collection, voter, token_balance)
    }

    pub fn can_propose(&self, collection: &Collection, creator: &Principal, token_balance: u128) -> bool {
        (self.can_propose)(collection, creator, token_balance)
    }

    pub fn tally(&self, collection: &Collection, proposal: &Proposal, ctx: &TallyContext) -> Tally {
        (self.tally)(collection, proposal, ctx)
    }

    pub fn can_execute(&self, collection: &Collection, proposal: &Proposal, caller: &Principal) -> bool {
        (self.can_execute)(collection, proposal, caller)
    }
}

static STRATEGIES: [Strategy; 4] = [
    Strategy {
        model: GovernanceModel::Permissionless,
        token_weighted: false,
        advisory_votes: false,
        is_eligible_voter: no_voters,
        can_propose: admin_only,
        tally: always_approved,
        can_execute: admin_executes,
    },
    Strategy {
        model: GovernanceModel::Multisig,
        token_weighted: false,
        advisory_votes: false,
        is_eligible_voter: admin_only,
        can_propose: admin_only,
        tally: multisig_tally,
        can_execute: admin_executes,
    },
    Strategy {
        model: GovernanceModel::TokenBased,
        token_weighted: true,
        advisory_votes: false,
        is_eligible_voter: token_holder,
        can_propose: admin_or_token_holder,
        tally: token_tally,
        can_execute: admin_executes,
    },
    Strategy {
        model: GovernanceModel::SnsIntegrated,
        token_weighted: false,
        advisory_votes: true,
        is_eligible_voter: admin_only,
        can_propose: admin_only,
        tally: never_decides,
        can_execute: admin_executes,
    },
];

/// Look up the rules for a governance model
pub fn resolve(model: GovernanceModel) -> &'static Strategy {
    let strategy = match model {
        GovernanceModel::Permissionless => &STRATEGIES[0],
        GovernanceModel::Multisig => &STRATEGIES[1],
        GovernanceModel::TokenBased => &STRATEGIES[2],
        GovernanceModel::SnsIntegrated => &STRATEGIES[3],
    };
    debug_assert_eq!(strategy.model, model);
    strategy
}

fn no_voters(_: &Collection, _: &Principal, _: u128) -> bool {
    false
}

fn admin_only(collection: &Collection, principal: &Principal, _: u128) -> bool {
    collection.is_admin(principal)
}

fn token_holder(_: &Collection, _: &Principal, balance: u128) -> bool {
    balance > 0
}

fn admin_or_token_holder(collection: &Collection, principal: &Principal, balance: u128) -> bool {
    collection.is_admin(principal) || balance > 0
}

fn admin_executes(collection: &Collection, _: &Proposal, caller: &Principal) -> bool {
    collection.is_admin(caller)
}

fn always_approved(_: &Collection, _: &Proposal, _: &TallyContext) -> Tally {
    Tally::Approved
}

// Remote governance decides; see governance::sync
fn never_decides(_: &Collection, _: &Proposal, _: &TallyContext) -> Tally {
    Tally::Pending
}

// No votes never reject; an unapproved proposal simply expires
fn multisig_tally(collection: &Collection, proposal: &Proposal, _: &TallyContext) -> Tally {
    if proposal.yes_count() >= collection.threshold as usize {
        Tally::Approved
    } else {
        Tally::Pending
    }
}

fn token_tally(collection: &Collection, proposal: &Proposal, ctx: &TallyContext) -> Tally {
    let supply = match ctx.total_supply {
        Some(supply) if supply > 0 => supply,
        _ => return Tally::Pending,
    };

    let yes = proposal.weight_for(VoteChoice::Yes);
    if yes >= quorum_weight(supply, collection.quorum_threshold) {
        Tally::Approved
    } else {
        Tally::Pending
    }
}

/// Smallest weight that reaches `quorum` percent of `supply`, rounded up.
/// Splits `supply` by 100 first so the product never leaves u128.
fn quorum_weight(supply: u128, quorum: u32) -> u128 {
    let quorum = u128::from(quorum);
    let whole = (supply / 100).saturating_mul(quorum);
    let part = ((supply % 100) * quorum).div_ceil(100);
    whole.saturating_add(part)
}
