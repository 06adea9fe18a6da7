//! Negotiation configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chaos_types::{ChaosError, Result, MAX_POINTS, MIN_POINTS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Seconds an offer stays open before it expires
    #[serde(default = "default_offer_window_secs")]
    pub offer_window_secs: u64,
    /// Smallest amount an offer may carry
    #[serde(default = "default_min_points")]
    pub min_points: i64,
    /// Largest amount an offer may carry
    #[serde(default = "default_max_points")]
    pub max_points: i64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            offer_window_secs: default_offer_window_secs(),
            min_points: default_min_points(),
            max_points: default_max_points(),
        }
    }
}

impl NegotiationConfig {
    pub fn offer_window(&self) -> Duration {
        Duration::from_secs(self.offer_window_secs)
    }

    /// Bounds may only narrow the hard `[1, 20]` range
    pub fn validate(&self) -> Result<()> {
        if self.offer_window_secs == 0 {
            return Err(ChaosError::invalid_input("offer_window_secs", "must be positive"));
        }
        if self.min_points < MIN_POINTS || self.max_points > MAX_POINTS || self.min_points > self.max_points {
            return Err(ChaosError::invalid_input(
                "points",
                format!("bounds must lie within [{MIN_POINTS}, {MAX_POINTS}]"),
            ));
        }
        Ok(())
    }
}

fn default_offer_window_secs() -> u64 {
    300
}

fn default_min_points() -> i64 {
    MIN_POINTS
}

fn default_max_points() -> i64 {
    MAX_POINTS
}
