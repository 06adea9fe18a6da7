//! A single pick window

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use chaos_types::{AgentId, ChaosError, LotteryPick, Multiplier, Result, WindowId};

#[derive(Debug, Default)]
struct Pool {
    picks: Vec<LotteryPick>,
    seen: HashSet<AgentId>,
}

/// Collects one binding pick per participant until closed
#[derive(Debug)]
pub struct LotteryWindow {
    id: WindowId,
    opened_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
    pool: Mutex<Pool>,
    closed: AtomicBool,
    resolved: AtomicBool,
}

impl LotteryWindow {
    pub fn new(closes_at: DateTime<Utc>) -> Self {
        Self {
            id: WindowId::new(),
            opened_at: Utc::now(),
            closes_at,
            pool: Mutex::new(Pool::default()),
            closed: AtomicBool::new(false),
            resolved: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn closes_at(&self) -> DateTime<Utc> {
        self.closes_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub fn participants(&self) -> usize {
        self.pool.lock().picks.len()
    }

    /// Record a pick. The first pick of a participant is binding.
    pub fn record(&self, user_id: &AgentId, multiplier: Multiplier) -> Result<()> {
        let mut pool = self.pool.lock();
        // Checked under the pool lock so a pick cannot slip in after `close`
        if self.is_closed() {
            return Err(ChaosError::WindowClosed {
                window_id: self.id.to_string(),
            });
        }
        if !pool.seen.insert(user_id.clone()) {
            return Err(ChaosError::DuplicatePick {
                agent_id: user_id.to_string(),
                window_id: self.id.to_string(),
            });
        }
        pool.picks.push(LotteryPick {
            user_id: user_id.clone(),
            multiplier,
        });
        Ok(())
    }

    /// Stop accepting picks. Idempotent.
    pub fn close(&self) {
        let _pool = self.pool.lock();
        self.closed.store(true, Ordering::Release);
    }

    /// Close the window and hand out its picks exactly once. Later calls get
    /// `None`.
    pub(crate) fn claim(&self) -> Option<Vec<LotteryPick>> {
        self.close();
        if self.resolved.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut self.pool.lock().picks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> LotteryWindow {
        LotteryWindow::new(Utc::now())
    }

    #[test]
    fn test_first_pick_binds() {
        let window = window();
        let alice = AgentId::from("alice");
        window.record(&alice, Multiplier::X2).unwrap();

        let err = window.record(&alice, Multiplier::X5).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_PICK");
        assert_eq!(window.participants(), 1);
    }

    #[test]
    fn test_closed_window_rejects() {
        let window = window();
        window.close();
        let err = window
            .record(&AgentId::from("late"), Multiplier::X3)
            .unwrap_err();
        assert_eq!(err.error_code(), "WINDOW_CLOSED");
    }

    #[test]
    fn test_claim_is_single_fire() {
        let window = window();
        window.record(&AgentId::from("a"), Multiplier::X3).unwrap();

        let picks = window.claim().unwrap();
        assert_eq!(picks.len(), 1);
        assert!(window.claim().is_none());
        assert!(window.is_closed());
        assert!(window.is_resolved());
        assert_eq!(window.participants(), 0);
    }
}
