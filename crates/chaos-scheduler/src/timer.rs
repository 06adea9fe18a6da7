//! Fire-once timers and recurring cron jobs on the tokio runtime

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::Schedule;

/// Handle on a spawned timer task. Dropping it leaves the timer armed.
#[derive(Debug)]
pub struct TimerHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> TimerHandle<T> {
    /// Cancel the timer if it has not fired yet
    pub fn disarm(&self) {
        self.handle.abort();
    }

    /// Detached handle that can disarm the timer from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task. `None` if it was disarmed or panicked.
    pub async fn join(self) -> Option<T> {
        match self.handle.await {
            Ok(value) => Some(value),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                error!(error = %e, "Timer task panicked");
                None
            }
        }
    }
}

/// Run `task` once after `delay`
pub fn after<F>(delay: Duration, task: F) -> TimerHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await
    });
    TimerHandle { handle }
}

/// Run `job` at every firing of `schedule` on the `zone` wall clock, until
/// disarmed
pub fn cron<F, Fut>(name: &'static str, schedule: Schedule, zone: Tz, mut job: F) -> TimerHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut last = Utc::now();
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(last.max(now), &zone) else {
                warn!(job = name, schedule = %schedule, "Schedule has no upcoming firing");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(job = name, next = %next, "Job armed");

            tokio::time::sleep(wait).await;
            info!(job = name, schedule = %schedule, "Running scheduled job");
            job().await;
            last = next;
        }
    });
    TimerHandle { handle }
}
