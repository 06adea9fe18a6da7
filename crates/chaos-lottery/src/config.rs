//! Lottery configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chaos_types::{ChaosError, LotteryOdds, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Seconds the pick window stays open
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default)]
    pub odds: LotteryOdds,
    /// Attempts to take a busy winner's lock before giving up on the payout
    #[serde(default = "default_payout_attempts")]
    pub payout_attempts: u32,
    #[serde(default = "default_payout_backoff_ms")]
    pub payout_backoff_ms: u64,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            odds: LotteryOdds::default(),
            payout_attempts: default_payout_attempts(),
            payout_backoff_ms: default_payout_backoff_ms(),
        }
    }
}

impl LotteryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn payout_backoff(&self) -> Duration {
        Duration::from_millis(self.payout_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(ChaosError::invalid_input("window_secs", "must be positive"));
        }
        if self.payout_attempts == 0 {
            return Err(ChaosError::invalid_input("payout_attempts", "must be at least 1"));
        }
        self.odds.validate()
    }
}

fn default_window_secs() -> u64 {
    15 * 60
}

fn default_payout_attempts() -> u32 {
    5
}

fn default_payout_backoff_ms() -> u64 {
    500
}
