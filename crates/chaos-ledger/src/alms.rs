//! Daily begging
//!
//! Once per day a participant may beg for a handful of points. The flag is
//! cleared by the daily reset job; begging again before that only earns shame.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use chaos_notify::{Notice, Notifier};
use chaos_types::{Actor, ChaosError, Result};

use crate::{reject_bot, Ledger};

/// Alms desk tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlmsConfig {
    /// Balance at or above which begging is refused outright
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_success_odds")]
    pub success_odds: f64,
    /// Second trial for devotees who failed the first
    #[serde(default = "default_devotee_odds")]
    pub devotee_odds: f64,
    #[serde(default = "default_min_award")]
    pub min_award: i64,
    #[serde(default = "default_max_award")]
    pub max_award: i64,
}

impl Default for AlmsConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            success_odds: default_success_odds(),
            devotee_odds: default_devotee_odds(),
            min_award: default_min_award(),
            max_award: default_max_award(),
        }
    }
}

impl AlmsConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, p) in [("success_odds", self.success_odds), ("devotee_odds", self.devotee_odds)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ChaosError::invalid_input(field, format!("probability {p} outside [0, 1]")));
            }
        }
        if self.min_award < 1 || self.min_award > self.max_award {
            return Err(ChaosError::invalid_input("award", "need 1 <= min_award <= max_award"));
        }
        Ok(())
    }
}

fn default_limit() -> i64 {
    50
}

fn default_success_odds() -> f64 {
    0.8
}

fn default_devotee_odds() -> f64 {
    0.6
}

fn default_min_award() -> i64 {
    1
}

fn default_max_award() -> i64 {
    10
}

/// What a single beg came to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlmsOutcome {
    /// Already begged today; shame went up
    AlreadyBegged { shame: i64 },
    TooWealthy,
    Refused,
    Granted { amount: i64, balance: i64 },
}

/// Begging counter
#[derive(Clone)]
pub struct AlmsDesk {
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    config: AlmsConfig,
}

impl AlmsDesk {
    pub fn new(ledger: Ledger, notifier: Arc<dyn Notifier>, config: AlmsConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }

    /// Beg once. A refused request is answered privately with the reason.
    pub async fn beg(&self, actor: &Actor, devotee: bool) -> Result<AlmsOutcome> {
        let result = self.try_beg(actor, devotee).await;
        if let Err(e) = &result {
            info!(agent_id = %actor.id, code = e.error_code(), "Beg rejected");
            let notice = Notice::rejection(&actor.id, e);
            if let Err(e) = self.notifier.direct_message(&actor.id, notice).await {
                warn!(to = %actor.id, error = %e, "Reply not delivered");
            }
        }
        result
    }

    async fn try_beg(&self, actor: &Actor, devotee: bool) -> Result<AlmsOutcome> {
        reject_bot(actor)?;
        let lock = self.ledger.lock(&actor.id)?;
        let agent = self.ledger.get_or_create(&actor.id).await?;

        if agent.begged {
            let agent = self.ledger.add_shame(&lock, 1).await?;
            return Ok(AlmsOutcome::AlreadyBegged { shame: agent.shame });
        }

        if agent.balance >= self.config.limit {
            return Ok(AlmsOutcome::TooWealthy);
        }

        let chance = self.ledger.chance();
        let mut success = chance.trial(self.config.success_odds);
        if !success && devotee {
            success = chance.trial(self.config.devotee_odds);
        }

        self.ledger.set_begged(&lock, true).await?;
        if !success {
            info!(agent_id = %actor.id, "Beg refused");
            return Ok(AlmsOutcome::Refused);
        }

        let amount = chance.roll(self.config.min_award, self.config.max_award);
        let agent = self.ledger.increase(&lock, amount).await?;
        info!(agent_id = %actor.id, amount, balance = agent.balance, "Beg granted");
        Ok(AlmsOutcome::Granted {
            amount,
            balance: agent.balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chaos_notify::ScriptedNotifier;
    use chaos_store::InMemoryAgentStore;
    use chaos_types::{AgentId, ErrorKind, ScriptedChance};

    use crate::UserMutex;

    fn desk_with_notifier(chance: ScriptedChance) -> (AlmsDesk, Ledger, Arc<ScriptedNotifier>) {
        let ledger = Ledger::with_parts(
            Arc::new(InMemoryAgentStore::new()),
            UserMutex::new(),
            Arc::new(chance),
        );
        let notifier = Arc::new(ScriptedNotifier::new());
        let desk = AlmsDesk::new(ledger.clone(), notifier.clone(), AlmsConfig::default());
        (desk, ledger, notifier)
    }

    fn desk(chance: ScriptedChance) -> (AlmsDesk, Ledger) {
        let (desk, ledger, _) = desk_with_notifier(chance);
        (desk, ledger)
    }

    #[test]
    fn test_config_validation() {
        assert!(AlmsConfig::default().validate().is_ok());
        let bad = AlmsConfig {
            min_award: 5,
            max_award: 2,
            ..AlmsConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_granted_then_shamed() {
        let (desk, ledger) = desk(ScriptedChance::always(true).with_roll(6));
        let actor = Actor::user("vagabond");

        let first = desk.beg(&actor, false).await.unwrap();
        assert_eq!(first, AlmsOutcome::Granted { amount: 6, balance: 6 });

        let second = desk.beg(&actor, false).await.unwrap();
        assert_eq!(second, AlmsOutcome::AlreadyBegged { shame: 1 });

        let agent = ledger.get(&actor.id).await.unwrap().unwrap();
        assert_eq!(agent.balance, 6);
        assert!(agent.begged);
    }

    #[tokio::test]
    async fn test_refusal_still_sets_flag() {
        let (desk, ledger) = desk(ScriptedChance::always(false));
        let actor = Actor::user("vagabond");

        assert_eq!(desk.beg(&actor, false).await.unwrap(), AlmsOutcome::Refused);
        let agent = ledger.get(&actor.id).await.unwrap().unwrap();
        assert!(agent.begged);
        assert_eq!(agent.balance, 0);
    }

    #[tokio::test]
    async fn test_devotee_gets_second_trial() {
        let (desk, _) = desk(ScriptedChance::sequence([false, true]).with_roll(2));
        let outcome = desk.beg(&Actor::user("cultist"), true).await.unwrap();
        assert_eq!(outcome, AlmsOutcome::Granted { amount: 2, balance: 2 });
    }

    #[tokio::test]
    async fn test_non_devotee_gets_one_trial() {
        let (desk, _) = desk(ScriptedChance::sequence([false, true]));
        let outcome = desk.beg(&Actor::user("heretic"), false).await.unwrap();
        assert_eq!(outcome, AlmsOutcome::Refused);
    }

    #[tokio::test]
    async fn test_wealthy_are_turned_away() {
        let (desk, ledger) = desk(ScriptedChance::always(true));
        let actor = Actor::user("rich");
        ledger
            .admin_set_balance(&Actor::user("admin"), &actor, 50)
            .await
            .unwrap();

        assert_eq!(desk.beg(&actor, false).await.unwrap(), AlmsOutcome::TooWealthy);
        let agent = ledger.get(&actor.id).await.unwrap().unwrap();
        assert!(!agent.begged);
    }

    #[tokio::test]
    async fn test_concurrent_beg_is_busy() {
        let (desk, ledger, notifier) = desk_with_notifier(ScriptedChance::always(true));
        let _held = ledger.lock(&AgentId::from("a")).unwrap();

        let err = desk.beg(&Actor::user("a"), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);

        let replies = notifier.direct_messages();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, AgentId::from("a"));
        assert!(matches!(&replies[0].1, Notice::Rejected { code, .. } if code == "BUSY"));
    }

    #[tokio::test]
    async fn test_bot_beg_is_answered_once() {
        let (desk, _, notifier) = desk_with_notifier(ScriptedChance::always(true));

        let err = desk.beg(&Actor::bot("neco"), false).await.unwrap_err();
        assert_eq!(err.error_code(), "BOT_TARGET");
        assert_eq!(notifier.count(|n| matches!(n, Notice::Rejected { .. })), 1);
    }

    #[tokio::test]
    async fn test_successful_beg_sends_no_reply() {
        let (desk, _, notifier) = desk_with_notifier(ScriptedChance::always(true).with_roll(3));

        desk.beg(&Actor::user("a"), false).await.unwrap();
        assert!(notifier.direct_messages().is_empty());
    }
}
