//! Chaos Negotiation - Two-party point offers
//!
//! An offer moves `Proposed -> Accepted | Cancelled | Expired` exactly once.
//! Every transition goes through [`NegotiationEngine::resolve`], which holds
//! the offer's own async mutex and checks for a terminal state first, so a
//! timeout racing a settlement waits and then sees the offer resolved.
//!
//! Settlement takes the ledger locks of both parties. If either is held the
//! offer stays open and the counterpart may try again until it expires.

pub mod config;
pub mod engine;

pub use config::NegotiationConfig;
pub use engine::{
    NegotiationEngine, OpenOffer, Proposal, Resolution, CHOICE_ACCEPT, CHOICE_CANCEL,
};
