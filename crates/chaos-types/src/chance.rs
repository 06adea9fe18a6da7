//! Sources of randomness for trials and rolls
//!
//! Engines take an `Arc<dyn Chance>` so that tests can script outcomes.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

/// Bernoulli trials and uniform integer rolls
pub trait Chance: Send + Sync {
    /// `true` with probability `p`
    fn trial(&self, p: f64) -> bool;

    /// Uniform integer in `[min, max]`
    fn roll(&self, min: i64, max: i64) -> i64;
}

/// Thread-local RNG backed chance
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChance;

impl Chance for RandomChance {
    fn trial(&self, p: f64) -> bool {
        rand::thread_rng().gen_bool(p.clamp(0.0, 1.0))
    }

    fn roll(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Deterministic chance: trials pop from a script, then fall back to a default
#[derive(Debug)]
pub struct ScriptedChance {
    trials: Mutex<VecDeque<bool>>,
    fallback: bool,
    roll: Option<i64>,
}

impl ScriptedChance {
    /// Every trial returns `outcome`
    pub fn always(outcome: bool) -> Self {
        Self {
            trials: Mutex::new(VecDeque::new()),
            fallback: outcome,
            roll: None,
        }
    }

    /// Trials return `script` in order, then `false`
    pub fn sequence(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            trials: Mutex::new(script.into_iter().collect()),
            fallback: false,
            roll: None,
        }
    }

    /// Rolls return `value`, clamped into the requested range
    pub fn with_roll(mut self, value: i64) -> Self {
        self.roll = Some(value);
        self
    }
}

impl Chance for ScriptedChance {
    fn trial(&self, _p: f64) -> bool {
        self.trials.lock().pop_front().unwrap_or(self.fallback)
    }

    fn roll(&self, min: i64, max: i64) -> i64 {
        match self.roll {
            Some(value) => value.clamp(min, max.max(min)),
            None => min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_roll_stays_in_range() {
        let chance = RandomChance;
        for _ in 0..200 {
            let v = chance.roll(1, 10);
            assert!((1..=10).contains(&v));
        }
        assert_eq!(chance.roll(4, 4), 4);
    }

    #[test]
    fn test_random_trial_extremes() {
        let chance = RandomChance;
        assert!(chance.trial(1.0));
        assert!(!chance.trial(0.0));
    }

    #[test]
    fn test_scripted_sequence_then_false() {
        let chance = ScriptedChance::sequence([true, false, true]);
        assert!(chance.trial(0.5));
        assert!(!chance.trial(0.5));
        assert!(chance.trial(0.5));
        assert!(!chance.trial(0.5));
    }

    #[test]
    fn test_scripted_roll_is_clamped() {
        let chance = ScriptedChance::always(true).with_roll(99);
        assert_eq!(chance.roll(1, 10), 10);
    }
}
