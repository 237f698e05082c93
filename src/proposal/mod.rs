//! Proposal module
//!
//! Proposed changes to a collection and their per-collection storage.

mod changes;
mod models;
mod store;

pub use models::*;
pub use store::ProposalStore;
