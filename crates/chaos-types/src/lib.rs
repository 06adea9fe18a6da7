//! Chaos Types - Canonical domain types for the chaos economy
//!
//! This crate contains the foundational types shared by every chaos crate
//! and has no dependencies on them:
//!
//! - Identity types (AgentId, OfferId, WindowId, PromptId)
//! - Agent records and the audit trail
//! - Offers, points and the offer state machine
//! - Lottery multipliers, odds and picks
//! - The error taxonomy and randomness sources
//!
//! # Invariants
//!
//! 1. Points on an offer always lie in `[1, 20]`
//! 2. An offer reaches exactly one terminal state
//! 3. Lottery odds strictly decrease as the multiplier increases

pub mod identity;
pub mod agent;
pub mod offer;
pub mod lottery;
pub mod chance;
pub mod error;

pub use identity::*;
pub use agent::*;
pub use offer::*;
pub use lottery::*;
pub use chance::*;
pub use error::*;
