//! Recording notifier for tests
//!
//! Interactions pushed with [`ScriptedNotifier::respond`] queue up in a single
//! inbox and are handed to whichever prompt is awaited next.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use chaos_types::{Actor, AgentId, PromptId};

use crate::{
    ChoiceOutcome, ChoiceWindow, Interaction, Notice, Notifier, NotifyError, NotifyResult,
    Prompt,
};

/// Everything a [`ScriptedNotifier`] was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Announce(Notice),
    Direct(AgentId, Notice),
    Prompt(PromptId, Prompt),
    Close(PromptId),
}

pub struct ScriptedNotifier {
    sent: Mutex<Vec<Sent>>,
    open: Mutex<HashSet<PromptId>>,
    inbox_tx: mpsc::UnboundedSender<Interaction>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Interaction>>,
    prompted: Notify,
}

impl Default for ScriptedNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedNotifier {
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            open: Mutex::new(HashSet::new()),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
            prompted: Notify::new(),
        }
    }

    /// Queue an answer for the next awaited prompt
    pub fn respond(&self, responder: Actor, choice: impl Into<String>) {
        // The receiver lives as long as `self`.
        let _ = self.inbox_tx.send(Interaction::new(responder, choice));
    }

    /// Wait until at least `count` prompts have been opened
    pub async fn wait_for_prompts(&self, count: usize) {
        loop {
            let notified = self.prompted.notified();
            if self.prompts().len() >= count {
                return;
            }
            notified.await;
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Broadcast notices, in order
    pub fn announcements(&self) -> Vec<Notice> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Announce(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages(&self) -> Vec<(AgentId, Notice)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Direct(to, n) => Some((to.clone(), n.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn prompts(&self) -> Vec<(PromptId, Prompt)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Prompt(id, p) => Some((*id, p.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn closed_prompts(&self) -> Vec<PromptId> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Close(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Notices of every kind, broadcast or direct, matching `pred`
    pub fn count(&self, pred: impl Fn(&Notice) -> bool) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| match s {
                Sent::Announce(n) | Sent::Direct(_, n) => pred(n),
                _ => false,
            })
            .count()
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn announce(&self, notice: Notice) -> NotifyResult<()> {
        self.sent.lock().push(Sent::Announce(notice));
        Ok(())
    }

    async fn prompt_choice(&self, prompt: Prompt) -> NotifyResult<PromptId> {
        let id = PromptId::new();
        self.open.lock().insert(id);
        self.sent.lock().push(Sent::Prompt(id, prompt));
        self.prompted.notify_waiters();
        Ok(id)
    }

    async fn await_choice(
        &self,
        prompt: PromptId,
        window: ChoiceWindow,
    ) -> NotifyResult<ChoiceOutcome> {
        if !self.open.lock().contains(&prompt) {
            return Err(NotifyError::PromptClosed(prompt));
        }

        let mut inbox = self.inbox_rx.lock().await;
        match tokio::time::timeout(window.timeout, inbox.recv()).await {
            Ok(Some(interaction)) => Ok(ChoiceOutcome::Chosen(interaction)),
            Ok(None) => Err(NotifyError::Delivery("inbox closed".to_string())),
            Err(_) => Ok(ChoiceOutcome::Timeout),
        }
    }

    async fn close_prompt(&self, prompt: PromptId) -> NotifyResult<()> {
        if self.open.lock().remove(&prompt) {
            self.sent.lock().push(Sent::Close(prompt));
        }
        Ok(())
    }

    async fn direct_message(&self, to: &AgentId, notice: Notice) -> NotifyResult<()> {
        self.sent.lock().push(Sent::Direct(to.clone(), notice));
        Ok(())
    }
}
