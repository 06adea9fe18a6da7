//! Notifier that writes to the tracing pipeline

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use chaos_types::{AgentId, PromptId};

use crate::{
    ChoiceOutcome, ChoiceWindow, Notice, Notifier, NotifyError, NotifyResult, Prompt,
};

/// Logs every notice as structured JSON. Prompts are logged and then wait out
/// their window, since nobody can answer them.
#[derive(Debug, Default)]
pub struct TracingNotifier {
    open: Mutex<HashSet<PromptId>>,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

fn render<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn announce(&self, notice: Notice) -> NotifyResult<()> {
        info!(notice = %render(&notice), "announce");
        Ok(())
    }

    async fn prompt_choice(&self, prompt: Prompt) -> NotifyResult<PromptId> {
        let id = PromptId::new();
        info!(prompt_id = %id, prompt = %render(&prompt), "prompt opened");
        self.open.lock().insert(id);
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
        tokio::time::sleep(window.timeout).await;
        Ok(ChoiceOutcome::Timeout)
    }

    async fn close_prompt(&self, prompt: PromptId) -> NotifyResult<()> {
        if self.open.lock().remove(&prompt) {
            debug!(prompt_id = %prompt, "prompt closed");
        }
        Ok(())
    }

    async fn direct_message(&self, to: &AgentId, notice: Notice) -> NotifyResult<()> {
        info!(to = %to, notice = %render(&notice), "direct message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_prompt_times_out() {
        let notifier = TracingNotifier::new();
        let prompt = notifier
            .prompt_choice(Prompt {
                subject: crate::PromptSubject::Lottery {
                    window_id: chaos_types::WindowId::new(),
                },
                audience: None,
                choices: vec!["x2".into()],
                closes_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let outcome = notifier
            .await_choice(prompt, ChoiceWindow::single(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome, ChoiceOutcome::Timeout);

        notifier.close_prompt(prompt).await.unwrap();
        let closed = notifier
            .await_choice(prompt, ChoiceWindow::single(Duration::from_secs(5)))
            .await;
        assert!(matches!(closed, Err(NotifyError::PromptClosed(_))));
    }
}
