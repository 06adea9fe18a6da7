//! Offer registry and state machine driver

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chaos_ledger::{reject_bot, Ledger};
use chaos_notify::{
    ChoiceOutcome, ChoiceWindow, Interaction, Notice, Notifier, NotifyError, Prompt,
    PromptSubject,
};
use chaos_scheduler::TimerHandle;
use chaos_store::TransferReceipt;
use chaos_types::{
    Actor, Agent, AgentId, ChaosError, Direction, ErrorKind, Offer, OfferId, OfferState, Points,
    PromptId, Result, Transition,
};

use crate::NegotiationConfig;

pub const CHOICE_ACCEPT: &str = "accept";
pub const CHOICE_CANCEL: &str = "cancel";

/// Result of a proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// Ready to be opened
    Open(Offer),
    /// Author targeted themself and lost `points`
    SelfPunished { agent: Agent, points: i64 },
}

/// What a transition attempt came to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Accepted {
        offer: Offer,
        receipt: TransferReceipt,
    },
    Cancelled {
        offer: Offer,
    },
    Expired {
        offer: Offer,
    },
    /// A party was locked; the offer is still open
    Busy { agent_id: AgentId },
    /// Response from someone other than the counterpart, or an unknown choice
    Ignored,
    /// The offer was already resolved or discarded
    Stale,
}

impl Resolution {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted { .. } | Self::Cancelled { .. } | Self::Expired { .. }
        )
    }

    /// Terminal state reached, if any
    pub fn state(&self) -> Option<OfferState> {
        match self {
            Self::Accepted { .. } => Some(OfferState::Accepted),
            Self::Cancelled { .. } => Some(OfferState::Cancelled),
            Self::Expired { .. } => Some(OfferState::Expired),
            _ => None,
        }
    }
}

struct Slot {
    offer: tokio::sync::Mutex<Offer>,
    counterpart: AgentId,
    prompt: parking_lot::Mutex<Option<PromptId>>,
    expiry: parking_lot::Mutex<Option<AbortHandle>>,
}

/// An offer whose prompt is published and whose expiry timer is armed
pub struct OpenOffer {
    pub offer_id: OfferId,
    pub prompt: PromptId,
    pub deadline: Instant,
    expiry: TimerHandle<Result<Resolution>>,
}

impl OpenOffer {
    /// Wait for the expiry timer. `Stale` if a competing transition disarmed it.
    pub async fn expired(self) -> Result<Resolution> {
        self.expiry.join().await.unwrap_or(Ok(Resolution::Stale))
    }
}

/// Negotiation engine
#[derive(Clone)]
pub struct NegotiationEngine {
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    config: NegotiationConfig,
    offers: Arc<DashMap<OfferId, Arc<Slot>>>,
}

impl NegotiationEngine {
    pub fn new(ledger: Ledger, notifier: Arc<dyn Notifier>, config: NegotiationConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
            offers: Arc::new(DashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Offers opened and not yet resolved
    pub fn open_count(&self) -> usize {
        self.offers.len()
    }

    /// Snapshot of an open offer
    pub async fn offer(&self, offer_id: OfferId) -> Option<Offer> {
        let slot = self.slot(offer_id)?;
        let offer = slot.offer.lock().await;
        Some(offer.clone())
    }

    fn slot(&self, offer_id: OfferId) -> Option<Arc<Slot>> {
        self.offers.get(&offer_id).map(|entry| entry.value().clone())
    }

    // ========================================================================
    // Proposal
    // ========================================================================

    /// Validate and build an offer. A self-targeted offer punishes the author
    /// on the spot.
    pub async fn propose(
        &self,
        author: &Actor,
        counterpart: &Actor,
        points: i64,
        direction: Direction,
        reason: Option<String>,
        reward: Option<String>,
    ) -> Result<Proposal> {
        let result = self
            .try_propose(author, counterpart, points, direction, reason, reward)
            .await;
        if let Err(e) = &result {
            info!(author = %author.id, code = e.error_code(), "Proposal rejected");
            self.reply(&author.id, Notice::rejection(&author.id, e)).await;
        }
        result
    }

    async fn try_propose(
        &self,
        author: &Actor,
        counterpart: &Actor,
        points: i64,
        direction: Direction,
        reason: Option<String>,
        reward: Option<String>,
    ) -> Result<Proposal> {
        reject_bot(author)?;
        let points = Points::new(points)?;
        if points.value() < self.config.min_points || points.value() > self.config.max_points {
            return Err(ChaosError::invalid_input(
                "points",
                format!(
                    "must be between {} and {}",
                    self.config.min_points, self.config.max_points
                ),
            ));
        }

        if author.id == counterpart.id {
            return self.punish_self(author, points).await;
        }
        reject_bot(counterpart)?;

        let author_agent = self.ledger.get_or_create(&author.id).await?;
        self.ledger.get_or_create(&counterpart.id).await?;

        if direction == Direction::Gift && author_agent.balance < points.value() {
            return Err(ChaosError::InsufficientBalance {
                agent_id: author.id.to_string(),
                required: points.value(),
                available: author_agent.balance,
            });
        }

        let window = chrono::Duration::from_std(self.config.offer_window())
            .map_err(|e| ChaosError::internal(format!("offer window: {e}")))?;
        let offer = Offer::new(
            author.id.clone(),
            counterpart.id.clone(),
            points,
            direction,
            reason,
            reward,
            window,
        )?;
        info!(
            offer_id = %offer.id,
            author = %offer.author,
            counterpart = %offer.counterpart,
            points = points.value(),
            direction = ?direction,
            "Offer proposed"
        );
        Ok(Proposal::Open(offer))
    }

    async fn punish_self(&self, author: &Actor, points: Points) -> Result<Proposal> {
        let lock = self.ledger.lock(&author.id)?;
        self.ledger.get_or_create(&author.id).await?;
        let agent = self.ledger.decrease(&lock, points.value()).await?;
        drop(lock);

        info!(agent_id = %author.id, points = points.value(), balance = agent.balance, "Self-targeted offer punished");
        self.announce(Notice::SelfPunished {
            agent_id: author.id.clone(),
            points: points.value(),
            balance: agent.balance,
        })
        .await;
        Ok(Proposal::SelfPunished {
            agent,
            points: points.value(),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register the offer, publish its prompt and arm the expiry timer
    pub async fn open(&self, offer: Offer) -> Result<OpenOffer> {
        let offer_id = offer.id;
        let counterpart = offer.counterpart.clone();
        let prompt = Prompt {
            subject: PromptSubject::Offer {
                offer: offer.clone(),
            },
            audience: Some(counterpart.clone()),
            choices: vec![CHOICE_ACCEPT.to_string(), CHOICE_CANCEL.to_string()],
            closes_at: offer.expires_at,
        };

        let slot = Arc::new(Slot {
            offer: tokio::sync::Mutex::new(offer),
            counterpart,
            prompt: parking_lot::Mutex::new(None),
            expiry: parking_lot::Mutex::new(None),
        });
        self.offers.insert(offer_id, slot.clone());

        let prompt_id = match self.notifier.prompt_choice(prompt).await {
            Ok(id) => id,
            Err(e) => {
                warn!(offer_id = %offer_id, error = %e, "Could not publish offer");
                self.offers.remove(&offer_id);
                return Err(e.into());
            }
        };
        *slot.prompt.lock() = Some(prompt_id);

        let window = self.config.offer_window();
        let engine = self.clone();
        let expiry = chaos_scheduler::after(window, async move {
            engine.resolve(offer_id, Transition::Expire).await
        });
        *slot.expiry.lock() = Some(expiry.abort_handle());

        Ok(OpenOffer {
            offer_id,
            prompt: prompt_id,
            deadline: Instant::now() + window,
            expiry,
        })
    }

    /// Feed one interaction into an open offer. Only the counterpart counts.
    pub async fn respond(&self, offer_id: OfferId, interaction: &Interaction) -> Result<Resolution> {
        let Some(slot) = self.slot(offer_id) else {
            debug!(offer_id = %offer_id, "Response to resolved offer dropped");
            return Ok(Resolution::Stale);
        };
        if interaction.responder.id != slot.counterpart {
            debug!(offer_id = %offer_id, responder = %interaction.responder.id, "Response from non-counterpart ignored");
            return Ok(Resolution::Ignored);
        }

        let transition = match interaction.choice.as_str() {
            CHOICE_ACCEPT => Transition::Accept,
            CHOICE_CANCEL => Transition::Cancel,
            other => {
                debug!(offer_id = %offer_id, choice = other, "Unknown choice ignored");
                return Ok(Resolution::Ignored);
            }
        };

        let result = self.resolve(offer_id, transition).await;
        if let Err(e) = &result {
            self.reply(&interaction.responder.id, Notice::rejection(&interaction.responder.id, e))
                .await;
        }
        result
    }

    /// Fire a terminal transition. The first one wins; anything after that
    /// is `Stale`.
    pub async fn resolve(&self, offer_id: OfferId, transition: Transition) -> Result<Resolution> {
        let Some(slot) = self.slot(offer_id) else {
            debug!(offer_id = %offer_id, ?transition, "Transition on discarded offer");
            return Ok(Resolution::Stale);
        };

        let mut offer = slot.offer.lock().await;
        if offer.state.is_terminal() {
            debug!(offer_id = %offer_id, ?transition, state = %offer.state, "Stale transition");
            return Ok(Resolution::Stale);
        }

        let resolution = match transition {
            Transition::Accept => {
                let payer = offer.payer().clone();
                let payee = offer.payee().clone();
                let pair = match self.ledger.lock_pair(&payer, &payee) {
                    Ok(pair) => pair,
                    Err(e) => return self.deferred(offer_id, e, &payer, &payee).await,
                };

                let receipt = self
                    .ledger
                    .transfer(&pair, &payer, &payee, offer.points.value())
                    .await?;
                drop(pair);

                offer.apply(Transition::Accept)?;
                self.announce(Notice::OfferAccepted {
                    offer_id,
                    payer,
                    payee,
                    points: offer.points.value(),
                })
                .await;
                Resolution::Accepted {
                    offer: offer.clone(),
                    receipt,
                }
            }
            Transition::Cancel => {
                let payer = offer.payer().clone();
                let payee = offer.payee().clone();
                let pair = match self.ledger.lock_pair(&payer, &payee) {
                    Ok(pair) => pair,
                    Err(e) => return self.deferred(offer_id, e, &payer, &payee).await,
                };
                offer.apply(Transition::Cancel)?;
                drop(pair);
                self.announce(Notice::OfferCancelled {
                    offer_id,
                    by: offer.counterpart.clone(),
                })
                .await;
                Resolution::Cancelled {
                    offer: offer.clone(),
                }
            }
            Transition::Expire => {
                offer.apply(Transition::Expire)?;
                self.announce(Notice::OfferExpired { offer_id }).await;
                Resolution::Expired {
                    offer: offer.clone(),
                }
            }
        };
        info!(offer_id = %offer_id, state = %offer.state, "Offer resolved");
        drop(offer);

        self.discard(offer_id, &slot, transition).await;
        Ok(resolution)
    }

    /// A party is held elsewhere; the offer stays open for another try
    async fn deferred(
        &self,
        offer_id: OfferId,
        error: ChaosError,
        payer: &AgentId,
        payee: &AgentId,
    ) -> Result<Resolution> {
        if error.kind() != ErrorKind::Busy {
            return Err(error);
        }
        let agent_id = busy_party(&error, payer, payee);
        info!(offer_id = %offer_id, agent_id = %agent_id, "Resolution deferred, party busy");
        self.announce(Notice::PartyBusy {
            offer_id,
            agent_id: agent_id.clone(),
        })
        .await;
        Ok(Resolution::Busy { agent_id })
    }

    async fn discard(&self, offer_id: OfferId, slot: &Slot, transition: Transition) {
        self.offers.remove(&offer_id);

        // The expiry task runs this path itself and must not cancel itself
        if transition != Transition::Expire {
            if let Some(timer) = slot.expiry.lock().take() {
                timer.abort();
            }
        }

        let prompt = slot.prompt.lock().take();
        if let Some(prompt) = prompt {
            if let Err(e) = self.notifier.close_prompt(prompt).await {
                warn!(offer_id = %offer_id, error = %e, "Failed to close offer prompt");
            }
        }
    }

    /// Open the offer and collect the counterpart's answer until it settles
    /// or the window runs out
    pub async fn negotiate(&self, offer: Offer) -> Result<Resolution> {
        let open = self.open(offer).await?;

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
                Ok(ChoiceOutcome::Chosen(interaction)) => {
                    match self.respond(open.offer_id, &interaction).await {
                        Ok(Resolution::Stale) => break,
                        Ok(resolution) if resolution.is_terminal() => return Ok(resolution),
                        // Busy, ignored or a failed settlement: keep listening
                        Ok(_) | Err(_) => continue,
                    }
                }
                Ok(ChoiceOutcome::Timeout) => break,
                Err(NotifyError::PromptClosed(_)) => break,
                Err(e) => {
                    warn!(offer_id = %open.offer_id, error = %e, "Lost the offer prompt");
                    break;
                }
            }
        }

        open.expired().await
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    async fn announce(&self, notice: Notice) {
        if let Err(e) = self.notifier.announce(notice).await {
            warn!(error = %e, "Announcement not delivered");
        }
    }

    async fn reply(&self, to: &AgentId, notice: Notice) {
        if let Err(e) = self.notifier.direct_message(to, notice).await {
            warn!(to = %to, error = %e, "Reply not delivered");
        }
    }
}

fn busy_party(error: &ChaosError, payer: &AgentId, payee: &AgentId) -> AgentId {
    match error {
        ChaosError::Busy { agent_id } if agent_id == payee.as_str() => payee.clone(),
        _ => payer.clone(),
    }
}
