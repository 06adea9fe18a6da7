//! Chaos Lottery - Weekly multiplier wager
//!
//! 1. **Collection**: a window accepts one pick (x2, x3 or x5) per participant
//! 2. **Resolution**: fires once at close; one Bernoulli trial per pick
//! 3. **Payout**: a winner ends at `max(balance, 1) * multiplier`, applied as
//!    a delta under the winner's lock; losers only receive their fate
//!
//! Resolving an already resolved window pays nothing.

pub mod config;
pub mod engine;
pub mod window;

pub use config::LotteryConfig;
pub use engine::{LotteryEngine, LotteryReport, OpenWindow, Payout};
pub use window::LotteryWindow;
