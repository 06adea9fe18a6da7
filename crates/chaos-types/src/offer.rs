//! Two-party offer types
//!
//! An offer moves through exactly one terminal transition:
//!
//! ```text
//! Proposed --accept--> Accepted
//! Proposed --cancel--> Cancelled
//! Proposed --expire--> Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AgentId, ChaosError, OfferId, Result};

/// Smallest transferable amount
pub const MIN_POINTS: i64 = 1;
/// Largest transferable amount
pub const MAX_POINTS: i64 = 20;
/// Longest accepted reason or reward text
pub const MAX_NOTE_LEN: usize = 100;

/// A validated offer amount in `[MIN_POINTS, MAX_POINTS]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Points(i64);

impl Points {
    pub fn new(value: i64) -> Result<Self> {
        if !(MIN_POINTS..=MAX_POINTS).contains(&value) {
            return Err(ChaosError::invalid_input(
                "points",
                format!("must be between {MIN_POINTS} and {MAX_POINTS}, got {value}"),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Points {
    type Error = ChaosError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Points> for i64 {
    fn from(points: Points) -> i64 {
        points.0
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way the points flow on acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Author pays counterpart
    Gift,
    /// Counterpart pays author
    Request,
}

impl Direction {
    fn default_reason(&self) -> &'static str {
        match self {
            Self::Gift => "No reason, just because.",
            Self::Request => "Just a poor vagabond asking for points.",
        }
    }

    fn default_reward(&self) -> &'static str {
        match self {
            Self::Gift => "Nothing, don't worry...",
            Self::Request => "Nothing, I'm insolvent.",
        }
    }
}

/// Lifecycle state of an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferState {
    Proposed,
    Accepted,
    Cancelled,
    Expired,
}

impl OfferState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Proposed)
    }
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Proposed => "Proposed",
            Self::Accepted => "Accepted",
            Self::Cancelled => "Cancelled",
            Self::Expired => "Expired",
        };
        f.write_str(s)
    }
}

/// A terminal transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Accept,
    Cancel,
    Expire,
}

impl Transition {
    /// State reached when this transition fires
    pub fn target(&self) -> OfferState {
        match self {
            Self::Accept => OfferState::Accepted,
            Self::Cancel => OfferState::Cancelled,
            Self::Expire => OfferState::Expired,
        }
    }
}

/// A proposed two-party point transfer awaiting resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub author: AgentId,
    pub counterpart: AgentId,
    pub points: Points,
    pub reason: String,
    pub reward_description: String,
    pub direction: Direction,
    pub state: OfferState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Offer {
    /// Build a proposed offer. Empty notes fall back to the direction's defaults.
    pub fn new(
        author: AgentId,
        counterpart: AgentId,
        points: Points,
        direction: Direction,
        reason: Option<String>,
        reward_description: Option<String>,
        window: Duration,
    ) -> Result<Self> {
        let reason = note_or_default("reason", reason, direction.default_reason())?;
        let reward_description =
            note_or_default("reward", reward_description, direction.default_reward())?;
        let now = Utc::now();
        Ok(Self {
            id: OfferId::new(),
            author,
            counterpart,
            points,
            reason,
            reward_description,
            direction,
            state: OfferState::Proposed,
            created_at: now,
            expires_at: now + window,
        })
    }

    /// Identity debited on acceptance
    pub fn payer(&self) -> &AgentId {
        match self.direction {
            Direction::Gift => &self.author,
            Direction::Request => &self.counterpart,
        }
    }

    /// Identity credited on acceptance
    pub fn payee(&self) -> &AgentId {
        match self.direction {
            Direction::Gift => &self.counterpart,
            Direction::Request => &self.author,
        }
    }

    /// Fire a terminal transition. A second transition is rejected.
    pub fn apply(&mut self, transition: Transition) -> Result<OfferState> {
        if self.state.is_terminal() {
            return Err(ChaosError::OfferAlreadyResolved {
                offer_id: self.id.to_string(),
                state: self.state.to_string(),
            });
        }
        self.state = transition.target();
        Ok(self.state)
    }
}

fn note_or_default(field: &str, note: Option<String>, default: &str) -> Result<String> {
    match note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        Some(n) if n.chars().count() > MAX_NOTE_LEN => Err(ChaosError::invalid_input(
            field,
            format!("must be at most {MAX_NOTE_LEN} characters"),
        )),
        Some(n) => Ok(n),
        None => Ok(default.to_string()),
    }
}
