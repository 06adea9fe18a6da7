//! Chaos Notify - Outbound contract of the chaos economy
//!
//! Engines never format chat messages. They emit typed [`Notice`]s, open
//! [`Prompt`]s with a fixed set of choices and wait for [`Interaction`]s
//! through the [`Notifier`] trait. The chat adapter that renders them lives
//! outside this workspace.
//!
//! Two implementations ship here:
//!
//! - [`TracingNotifier`]: writes every notice to the tracing pipeline; prompts
//!   never receive answers and always time out
//! - [`ScriptedNotifier`]: records everything it is sent and replays
//!   interactions pushed by a test

pub mod error;
pub mod scripted;
pub mod tracing_sink;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chaos_types::{Actor, AgentId, ChaosError, Multiplier, Offer, OfferId, PromptId, WindowId};

pub use error::{NotifyError, NotifyResult};
pub use scripted::{ScriptedNotifier, Sent};
pub use tracing_sink::TracingNotifier;

/// One row of the weekly standings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub rank: usize,
    pub agent_id: AgentId,
    pub balance: i64,
}

/// Everything the economy can say
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A request was refused; exactly one per rejected path
    Rejected {
        agent_id: AgentId,
        code: String,
        reason: String,
    },
    /// One party of a settlement is locked elsewhere
    PartyBusy {
        offer_id: OfferId,
        agent_id: AgentId,
    },
    OfferAccepted {
        offer_id: OfferId,
        payer: AgentId,
        payee: AgentId,
        points: i64,
    },
    OfferCancelled {
        offer_id: OfferId,
        by: AgentId,
    },
    OfferExpired {
        offer_id: OfferId,
    },
    /// The author targeted themself and paid for it
    SelfPunished {
        agent_id: AgentId,
        points: i64,
        balance: i64,
    },
    LotteryOpened {
        window_id: WindowId,
        closes_at: DateTime<Utc>,
    },
    PickRecorded {
        window_id: WindowId,
        agent_id: AgentId,
        multiplier: Multiplier,
    },
    LotteryWon {
        window_id: WindowId,
        agent_id: AgentId,
        multiplier: Multiplier,
        balance: i64,
    },
    /// Direct message to a losing participant
    LotteryLost {
        window_id: WindowId,
        multiplier: Multiplier,
        fate: String,
    },
    LotteryEmpty {
        window_id: WindowId,
    },
    Standings {
        entries: Vec<Standing>,
    },
    NoStandings,
    SeasonReset {
        agents: u64,
    },
    BeggingReset {
        agents: u64,
    },
}

impl Notice {
    /// The single reply owed to `agent_id` for a refused request
    pub fn rejection(agent_id: &AgentId, error: &ChaosError) -> Self {
        Notice::Rejected {
            agent_id: agent_id.clone(),
            code: error.error_code().to_string(),
            reason: error.to_string(),
        }
    }
}

/// What a prompt is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptSubject {
    Offer { offer: Offer },
    Lottery { window_id: WindowId },
}

/// An interactive message offering a fixed set of choices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub subject: PromptSubject,
    /// Only this identity is expected to answer, if set
    pub audience: Option<AgentId>,
    pub choices: Vec<String>,
    pub closes_at: DateTime<Utc>,
}

/// A single answer to a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub responder: Actor,
    pub choice: String,
}

impl Interaction {
    pub fn new(responder: Actor, choice: impl Into<String>) -> Self {
        Self {
            responder,
            choice: choice.into(),
        }
    }
}

/// Bounds on a single `await_choice` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceWindow {
    pub timeout: Duration,
    pub max_responses: usize,
}

impl ChoiceWindow {
    /// Wait up to `timeout` for one answer
    pub fn single(timeout: Duration) -> Self {
        Self {
            timeout,
            max_responses: 1,
        }
    }
}

/// Result of waiting on a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceOutcome {
    Chosen(Interaction),
    Timeout,
}

/// Outbound channel of the economy
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Broadcast a notice to the community channel
    async fn announce(&self, notice: Notice) -> NotifyResult<()>;

    /// Publish a prompt and return a handle to it
    async fn prompt_choice(&self, prompt: Prompt) -> NotifyResult<PromptId>;

    /// Wait for the next answer to `prompt`, bounded by `window`
    async fn await_choice(
        &self,
        prompt: PromptId,
        window: ChoiceWindow,
    ) -> NotifyResult<ChoiceOutcome>;

    /// Disable the prompt's choices. Closing twice is a no-op.
    async fn close_prompt(&self, prompt: PromptId) -> NotifyResult<()>;

    /// Send a notice to a single identity
    async fn direct_message(&self, to: &AgentId, notice: Notice) -> NotifyResult<()>;
}
