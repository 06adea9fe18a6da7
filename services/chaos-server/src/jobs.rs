//! Season jobs
//!
//! Each job is a plain async function so it can be driven by a cron timer in
//! production and called directly in tests.

use std::sync::Arc;

use tracing::{error, info, warn};

use chaos_ledger::Ledger;
use chaos_lottery::{LotteryEngine, LotteryReport};
use chaos_notify::{Notice, Notifier, Standing};
use chaos_scheduler::{cron, timezone, Schedule, TimerHandle};
use chaos_types::Result;

use crate::config::ScheduleConfig;

/// Clear every begging flag
pub async fn daily_reset(ledger: &Ledger, notifier: &dyn Notifier) -> Result<u64> {
    let agents = ledger.reset_begging().await?;
    announce(notifier, Notice::BeggingReset { agents }).await;
    Ok(agents)
}

/// Announce the leaders, then zero every balance. An empty roster is
/// announced and left alone; `None` means no reset happened.
pub async fn weekly_standings(
    ledger: &Ledger,
    notifier: &dyn Notifier,
    size: usize,
) -> Result<Option<u64>> {
    let leaders = ledger.standings(size).await?;
    if leaders.is_empty() {
        info!("No standings this week");
        announce(notifier, Notice::NoStandings).await;
        return Ok(None);
    }

    let entries = leaders
        .into_iter()
        .enumerate()
        .map(|(i, agent)| Standing {
            rank: i + 1,
            agent_id: agent.id,
            balance: agent.balance,
        })
        .collect();
    announce(notifier, Notice::Standings { entries }).await;

    let agents = ledger.reset_season().await?;
    announce(notifier, Notice::SeasonReset { agents }).await;
    Ok(Some(agents))
}

/// Run one lottery window to completion
pub async fn weekly_lottery(lottery: &LotteryEngine) -> Result<LotteryReport> {
    lottery.run_window().await
}

async fn announce(notifier: &dyn Notifier, notice: Notice) {
    if let Err(e) = notifier.announce(notice).await {
        warn!(error = %e, "Announcement not delivered");
    }
}

/// Arm every season job. Dropping the handles does not stop the jobs; disarm
/// them on shutdown.
pub fn register(
    schedule: &ScheduleConfig,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    lottery: LotteryEngine,
) -> Result<Vec<TimerHandle<()>>> {
    let zone = timezone(&schedule.timezone)?;
    let mut handles = Vec::with_capacity(3);

    let (daily_ledger, daily_notifier) = (ledger.clone(), notifier.clone());
    handles.push(cron(
        "daily_reset",
        Schedule::parse(&schedule.daily_reset)?,
        zone,
        move || {
            let (ledger, notifier) = (daily_ledger.clone(), daily_notifier.clone());
            async move {
                if let Err(e) = daily_reset(&ledger, notifier.as_ref()).await {
                    error!(error = %e, "Daily reset failed");
                }
            }
        },
    ));

    let size = schedule.standings_size;
    handles.push(cron(
        "weekly_standings",
        Schedule::parse(&schedule.weekly_standings)?,
        zone,
        move || {
            let (ledger, notifier) = (ledger.clone(), notifier.clone());
            async move {
                if let Err(e) = weekly_standings(&ledger, notifier.as_ref(), size).await {
                    error!(error = %e, "Weekly standings failed");
                }
            }
        },
    ));

    handles.push(cron(
        "weekly_lottery",
        Schedule::parse(&schedule.weekly_lottery)?,
        zone,
        move || {
            let lottery = lottery.clone();
            async move {
                match weekly_lottery(&lottery).await {
                    Ok(report) => info!(
                        window_id = %report.window_id,
                        participants = report.participants,
                        "Weekly lottery finished"
                    ),
                    Err(e) => error!(error = %e, "Weekly lottery failed"),
                }
            }
        },
    ));

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chaos_ledger::UserMutex;
    use chaos_lottery::LotteryConfig;
    use chaos_notify::ScriptedNotifier;
    use chaos_store::{AgentStore, InMemoryAgentStore};
    use chaos_types::{Agent, AgentId, ScriptedChance};

    fn setup() -> (Ledger, InMemoryAgentStore, Arc<ScriptedNotifier>) {
        let store = InMemoryAgentStore::new();
        let ledger = Ledger::with_parts(
            Arc::new(store.clone()),
            UserMutex::new(),
            Arc::new(ScriptedChance::always(true)),
        );
        (ledger, store, Arc::new(ScriptedNotifier::new()))
    }

    fn agent(store: &InMemoryAgentStore, name: &str, balance: i64, begged: bool) {
        let mut agent = Agent::new(AgentId::from(name));
        agent.balance = balance;
        agent.begged = begged;
        store.insert(agent);
    }

    #[tokio::test]
    async fn test_daily_reset_clears_begging() {
        let (ledger, store, notifier) = setup();
        agent(&store, "a", 3, true);
        agent(&store, "b", 0, true);

        daily_reset(&ledger, notifier.as_ref()).await.unwrap();

        for name in ["a", "b"] {
            let row = store.get(&AgentId::from(name)).await.unwrap().unwrap();
            assert!(!row.begged);
        }
        assert_eq!(
            notifier.count(|n| matches!(n, Notice::BeggingReset { agents: 2 })),
            1
        );
    }

    #[tokio::test]
    async fn test_weekly_standings_ranks_then_resets() {
        let (ledger, store, notifier) = setup();
        for (name, balance) in [("a", 4), ("b", 30), ("c", -2), ("d", 11), ("e", 0), ("f", 7)] {
            agent(&store, name, balance, false);
        }

        let reset = weekly_standings(&ledger, notifier.as_ref(), 5).await.unwrap();
        assert_eq!(reset, Some(6));

        let standings = notifier
            .announcements()
            .into_iter()
            .find_map(|n| match n {
                Notice::Standings { entries } => Some(entries),
                _ => None,
            })
            .unwrap();
        let order: Vec<_> = standings.iter().map(|s| s.agent_id.to_string()).collect();
        assert_eq!(order, ["b", "d", "f", "a", "e"]);
        assert_eq!(standings[0].rank, 1);
        assert_eq!(standings[0].balance, 30);

        assert_eq!(store.total_balance(), 0);
        assert!(matches!(
            notifier.announcements().last(),
            Some(Notice::SeasonReset { agents: 6 })
        ));
    }

    #[tokio::test]
    async fn test_empty_roster_skips_reset() {
        let (ledger, _store, notifier) = setup();

        let reset = weekly_standings(&ledger, notifier.as_ref(), 5).await.unwrap();

        assert_eq!(reset, None);
        assert_eq!(notifier.announcements(), vec![Notice::NoStandings]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_weekly_lottery_runs_a_full_window() {
        let (ledger, store, notifier) = setup();
        agent(&store, "a", 2, false);
        notifier.respond(chaos_types::Actor::user("a"), "x2");
        let lottery = LotteryEngine::new(ledger, notifier.clone(), LotteryConfig::default());

        let report = weekly_lottery(&lottery).await.unwrap();

        assert_eq!(report.participants, 1);
        assert_eq!(store.get(&AgentId::from("a")).await.unwrap().unwrap().balance, 4);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_schedule() {
        let (ledger, _store, notifier) = setup();
        let lottery = LotteryEngine::new(ledger.clone(), notifier.clone(), LotteryConfig::default());
        let schedule = ScheduleConfig {
            daily_reset: "not a cron".to_string(),
            ..ScheduleConfig::default()
        };

        assert!(register(&schedule, ledger, notifier, lottery).is_err());
    }

    #[tokio::test]
    async fn test_register_arms_three_jobs() {
        let (ledger, _store, notifier) = setup();
        let lottery = LotteryEngine::new(ledger.clone(), notifier.clone(), LotteryConfig::default());

        let handles = register(&ScheduleConfig::default(), ledger, notifier, lottery).unwrap();
        assert_eq!(handles.len(), 3);
        for handle in &handles {
            assert!(!handle.is_finished());
            handle.disarm();
        }
    }
}
