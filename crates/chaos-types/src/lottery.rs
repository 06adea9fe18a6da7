//! Lottery types: multipliers, odds and picks

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AgentId, ChaosError, Result};

/// Payout multiplier a participant bets on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Multiplier {
    X2,
    X3,
    X5,
}

impl Multiplier {
    pub const ALL: [Multiplier; 3] = [Multiplier::X2, Multiplier::X3, Multiplier::X5];

    pub fn value(&self) -> i64 {
        match self {
            Self::X2 => 2,
            Self::X3 => 3,
            Self::X5 => 5,
        }
    }

    /// Option key used in choice prompts
    pub fn label(&self) -> &'static str {
        match self {
            Self::X2 => "x2",
            Self::X3 => "x3",
            Self::X5 => "x5",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x2" | "2" => Some(Self::X2),
            "x3" | "3" => Some(Self::X3),
            "x5" | "5" => Some(Self::X5),
            _ => None,
        }
    }

    /// Cosmetic fate handed to a participant who lost on this multiplier
    pub fn loser_fate(&self) -> &'static str {
        match self {
            Self::X2 => "Losercity",
            Self::X3 => "Loserprison",
            Self::X5 => "Loserhell",
        }
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Win probability per multiplier. Must strictly decrease as the multiplier grows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotteryOdds {
    pub x2: f64,
    pub x3: f64,
    pub x5: f64,
}

impl Default for LotteryOdds {
    fn default() -> Self {
        Self {
            x2: 0.7,
            x3: 0.5,
            x5: 0.2,
        }
    }
}

impl LotteryOdds {
    pub fn for_multiplier(&self, multiplier: Multiplier) -> f64 {
        match multiplier {
            Multiplier::X2 => self.x2,
            Multiplier::X3 => self.x3,
            Multiplier::X5 => self.x5,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, p) in [("x2", self.x2), ("x3", self.x3), ("x5", self.x5)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ChaosError::invalid_input(
                    format!("odds.{label}"),
                    format!("probability {p} outside [0, 1]"),
                ));
            }
        }
        if !(self.x2 > self.x3 && self.x3 > self.x5) {
            return Err(ChaosError::invalid_input(
                "odds",
                "win probability must strictly decrease as the multiplier increases",
            ));
        }
        Ok(())
    }
}

/// One participant's binding pick for a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryPick {
    pub user_id: AgentId,
    pub multiplier: Multiplier,
}

/// Balance a winner ends up with: `max(balance, 1) * multiplier`
pub fn winning_balance(current: i64, multiplier: Multiplier) -> i64 {
    current.max(1).saturating_mul(multiplier.value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_odds_are_valid() {
        assert!(LotteryOdds::default().validate().is_ok());
    }

    #[test]
    fn test_non_decreasing_odds_rejected() {
        let odds = LotteryOdds {
            x2: 0.5,
            x3: 0.5,
            x5: 0.1,
        };
        assert!(odds.validate().is_err());
    }

    #[test]
    fn test_out_of_range_odds_rejected() {
        let odds = LotteryOdds {
            x2: 1.2,
            x3: 0.5,
            x5: 0.1,
        };
        assert!(odds.validate().is_err());
    }

    #[test]
    fn test_winning_balance_floors_at_one() {
        assert_eq!(winning_balance(0, Multiplier::X5), 5);
        assert_eq!(winning_balance(-8, Multiplier::X2), 2);
        assert_eq!(winning_balance(7, Multiplier::X3), 21);
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(Multiplier::parse("X5"), Some(Multiplier::X5));
        assert_eq!(Multiplier::parse("x4"), None);
    }
}
