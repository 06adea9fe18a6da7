//! Window lifecycle, resolution and payout

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use chaos_ledger::{reject_bot, Ledger};
use chaos_notify::{
    ChoiceOutcome, ChoiceWindow, Interaction, Notice, Notifier, NotifyError, Prompt,
    PromptSubject,
};
use chaos_types::{
    winning_balance, Actor, AgentId, ChaosError, ErrorKind, LotteryPick, Multiplier, PromptId,
    Result, WindowId,
};

use crate::{LotteryConfig, LotteryWindow};

/// A winner's settled payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub user_id: AgentId,
    pub multiplier: Multiplier,
    pub previous_balance: i64,
    pub balance: i64,
}

/// Outcome of one resolved window
#[derive(Debug, Clone)]
pub struct LotteryReport {
    pub window_id: WindowId,
    pub participants: usize,
    pub winners: Vec<Payout>,
    pub losers: Vec<LotteryPick>,
    /// Winners whose payout could not be applied
    pub unpaid: Vec<(LotteryPick, ChaosError)>,
}

/// A window with its published prompt
pub struct OpenWindow {
    pub window: Arc<LotteryWindow>,
    pub prompt: PromptId,
    pub deadline: Instant,
}

/// Lottery engine
#[derive(Clone)]
pub struct LotteryEngine {
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    config: LotteryConfig,
}

impl LotteryEngine {
    pub fn new(ledger: Ledger, notifier: Arc<dyn Notifier>, config: LotteryConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }

    /// Start a window and publish the multiplier prompt
    pub async fn open(&self) -> Result<OpenWindow> {
        let window_len = self.config.window();
        let closes_at = Utc::now()
            + chrono::Duration::from_std(window_len)
                .map_err(|e| ChaosError::internal(format!("lottery window: {e}")))?;
        let window = Arc::new(LotteryWindow::new(closes_at));

        let prompt = self
            .notifier
            .prompt_choice(Prompt {
                subject: PromptSubject::Lottery {
                    window_id: window.id(),
                },
                audience: None,
                choices: Multiplier::ALL.iter().map(|m| m.label().to_string()).collect(),
                closes_at,
            })
            .await?;

        self.announce(Notice::LotteryOpened {
            window_id: window.id(),
            closes_at,
        })
        .await;
        info!(window_id = %window.id(), closes_at = %closes_at, "Lottery window opened");

        Ok(OpenWindow {
            window,
            prompt,
            deadline: Instant::now() + window_len,
        })
    }

    /// Register a pick. Every call gets exactly one reply.
    pub async fn pick(&self, window: &LotteryWindow, actor: &Actor, choice: &str) -> Result<()> {
        let result = self.try_pick(window, actor, choice);
        let reply = match &result {
            Ok(multiplier) => Notice::PickRecorded {
                window_id: window.id(),
                agent_id: actor.id.clone(),
                multiplier: *multiplier,
            },
            Err(e) => {
                debug!(window_id = %window.id(), agent_id = %actor.id, code = e.error_code(), "Pick rejected");
                Notice::rejection(&actor.id, e)
            }
        };
        if let Err(e) = self.notifier.direct_message(&actor.id, reply).await {
            warn!(to = %actor.id, error = %e, "Pick reply not delivered");
        }
        result.map(|_| ())
    }

    fn try_pick(&self, window: &LotteryWindow, actor: &Actor, choice: &str) -> Result<Multiplier> {
        reject_bot(actor)?;
        let multiplier = Multiplier::parse(choice)
            .ok_or_else(|| ChaosError::invalid_input("multiplier", format!("unknown choice {choice}")))?;
        window.record(&actor.id, multiplier)?;
        Ok(multiplier)
    }

    /// Close the window, draw every pick and pay the winners. A window
    /// resolves once; later calls return `None` and touch nothing.
    pub async fn resolve(&self, window: &LotteryWindow) -> Result<Option<LotteryReport>> {
        let Some(picks) = window.claim() else {
            debug!(window_id = %window.id(), "Lottery window already resolved");
            return Ok(None);
        };

        let mut report = LotteryReport {
            window_id: window.id(),
            participants: picks.len(),
            winners: Vec::new(),
            losers: Vec::new(),
            unpaid: Vec::new(),
        };

        if picks.is_empty() {
            info!(window_id = %window.id(), "Lottery closed without participants");
            self.announce(Notice::LotteryEmpty {
                window_id: window.id(),
            })
            .await;
            return Ok(Some(report));
        }

        let chance = self.ledger.chance().clone();
        for pick in picks {
            let won = chance.trial(self.config.odds.for_multiplier(pick.multiplier));
            if !won {
                self.notify_loser(window.id(), &pick).await;
                report.losers.push(pick);
                continue;
            }

            match self.pay(&pick).await {
                Ok(payout) => {
                    self.announce(Notice::LotteryWon {
                        window_id: window.id(),
                        agent_id: payout.user_id.clone(),
                        multiplier: payout.multiplier,
                        balance: payout.balance,
                    })
                    .await;
                    report.winners.push(payout);
                }
                Err(e) => {
                    error!(window_id = %window.id(), agent_id = %pick.user_id, error = %e, "Lottery payout failed");
                    let notice = Notice::rejection(&pick.user_id, &e);
                    if let Err(e) = self.notifier.direct_message(&pick.user_id, notice).await {
                        warn!(to = %pick.user_id, error = %e, "Unpaid notice not delivered");
                    }
                    report.unpaid.push((pick, e));
                }
            }
        }

        info!(
            window_id = %window.id(),
            participants = report.participants,
            winners = report.winners.len(),
            losers = report.losers.len(),
            unpaid = report.unpaid.len(),
            "Lottery resolved"
        );
        Ok(Some(report))
    }

    /// Apply `max(balance, 1) * multiplier` as a delta under the winner's lock
    async fn pay(&self, pick: &LotteryPick) -> Result<Payout> {
        let mut attempt = 0;
        let lock = loop {
            attempt += 1;
            match self.ledger.lock(&pick.user_id) {
                Ok(lock) => break lock,
                Err(e) if e.kind() == ErrorKind::Busy && attempt < self.config.payout_attempts => {
                    debug!(agent_id = %pick.user_id, attempt, "Winner busy, retrying payout");
                    tokio::time::sleep(self.config.payout_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        };

        let agent = self.ledger.get_or_create(&pick.user_id).await?;
        let target = winning_balance(agent.balance, pick.multiplier);
        let updated = self.ledger.increase(&lock, target - agent.balance).await?;
        Ok(Payout {
            user_id: pick.user_id.clone(),
            multiplier: pick.multiplier,
            previous_balance: agent.balance,
            balance: updated.balance,
        })
    }

    async fn notify_loser(&self, window_id: WindowId, pick: &LotteryPick) {
        let notice = Notice::LotteryLost {
            window_id,
            multiplier: pick.multiplier,
            fate: pick.multiplier.loser_fate().to_string(),
        };
        if let Err(e) = self.notifier.direct_message(&pick.user_id, notice).await {
            warn!(to = %pick.user_id, error = %e, "Loser notice not delivered");
        }
    }

    /// Open a window, collect picks until it closes, then resolve it
    pub async fn run_window(&self) -> Result<LotteryReport> {
        let open = self.open().await?;

        loop {
            let remaining = open.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self
                .notifier
                .await_choice(open.prompt, ChoiceWindow::single(remaining))
                .await
            {
                Ok(ChoiceOutcome::Chosen(Interaction { responder, choice })) => {
                    // Rejections are answered inside `pick`
                    let _ = self.pick(&open.window, &responder, &choice).await;
                }
                Ok(ChoiceOutcome::Timeout) => break,
                Err(NotifyError::PromptClosed(_)) => break,
                Err(e) => {
                    warn!(window_id = %open.window.id(), error = %e, "Lost the lottery prompt");
                    tokio::time::sleep_until(open.deadline).await;
                    break;
                }
            }
        }

        open.window.close();
        if let Err(e) = self.notifier.close_prompt(open.prompt).await {
            warn!(window_id = %open.window.id(), error = %e, "Failed to close lottery prompt");
        }

        self.resolve(&open.window)
            .await?
            .ok_or_else(|| ChaosError::internal("lottery window resolved twice"))
    }

    async fn announce(&self, notice: Notice) {
        if let Err(e) = self.notifier.announce(notice).await {
            warn!(error = %e, "Announcement not delivered");
        }
    }
}
