//! Per-identity advisory lock registry
//!
//! Non-reentrant, non-blocking and without expiry. A flag is either held or
//! absent; there is no queue. Guards release their flag on drop, so an early
//! return or a panic in the holder still frees the identity.
//!
//! Every guard also holds a shared pass on the registry. [`UserMutex::exclusive`]
//! waits for all passes to come back and refuses new guards until it drops,
//! which keeps roster-wide resets out of any per-identity critical section.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, trace};

use chaos_types::AgentId;

/// Registry of held identities
#[derive(Clone, Default)]
pub struct UserMutex {
    held: Arc<DashMap<AgentId, DateTime<Utc>>>,
    passes: Arc<RwLock<()>>,
}

impl UserMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` only if the flag was absent and is now held by the caller.
    /// Raw flags carry no pass; use [`UserMutex::acquire`] around mutations.
    pub fn try_lock(&self, id: &AgentId) -> bool {
        match self.held.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                trace!(agent_id = %id, "locked");
                true
            }
        }
    }

    pub fn unlock(&self, id: &AgentId) {
        if self.held.remove(id).is_some() {
            trace!(agent_id = %id, "unlocked");
        }
    }

    pub fn is_locked(&self, id: &AgentId) -> bool {
        self.held.contains_key(id)
    }

    /// Number of identities currently held
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Take the flag for `id` as a guard. Fails while an exclusive hold is
    /// pending or active.
    pub fn acquire(&self, id: &AgentId) -> Option<AgentLock> {
        let pass = self.passes.clone().try_read_owned().ok()?;
        self.try_lock(id).then(|| AgentLock {
            registry: self.clone(),
            id: id.clone(),
            _pass: pass,
        })
    }

    /// Wait until every guard has dropped, then hold the whole registry
    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        let guard = self.passes.clone().write_owned().await;
        debug!(held = self.held.len(), "registry held exclusively");
        guard
    }

    /// Take both flags or neither. On conflict returns the identity that was
    /// already held.
    pub fn try_lock_pair(&self, a: &AgentId, b: &AgentId) -> Result<PairLock, AgentId> {
        let first = self.acquire(a).ok_or_else(|| a.clone())?;
        if a == b {
            return Ok(PairLock {
                first,
                second: None,
            });
        }
        // `first` drops here on conflict and frees `a` again
        let second = self.acquire(b).ok_or_else(|| b.clone())?;
        Ok(PairLock {
            first,
            second: Some(second),
        })
    }

    pub(crate) fn same_registry(&self, other: &UserMutex) -> bool {
        Arc::ptr_eq(&self.held, &other.held)
    }
}

/// Exclusive hold on one identity
#[derive(Debug)]
pub struct AgentLock {
    registry: UserMutex,
    id: AgentId,
    _pass: OwnedRwLockReadGuard<()>,
}

impl AgentLock {
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub(crate) fn registry(&self) -> &UserMutex {
        &self.registry
    }
}

impl Drop for AgentLock {
    fn drop(&mut self) {
        self.registry.unlock(&self.id);
    }
}

impl std::fmt::Debug for UserMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserMutex")
            .field("held", &self.held.len())
            .finish()
    }
}

/// Exclusive hold on two identities
#[derive(Debug)]
pub struct PairLock {
    first: AgentLock,
    second: Option<AgentLock>,
}

impl PairLock {
    /// Whether `id` is one of the held identities
    pub fn covers(&self, id: &AgentId) -> bool {
        self.first.id() == id || self.second.as_ref().is_some_and(|l| l.id() == id)
    }

    pub(crate) fn registry(&self) -> &UserMutex {
        self.first.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AgentId {
        AgentId::from(s)
    }

    #[test]
    fn test_try_lock_is_not_reentrant() {
        let mutex = UserMutex::new();
        assert!(mutex.try_lock(&id("a")));
        assert!(!mutex.try_lock(&id("a")));
        assert!(mutex.is_locked(&id("a")));

        mutex.unlock(&id("a"));
        assert!(!mutex.is_locked(&id("a")));
        assert!(mutex.try_lock(&id("a")));
    }

    #[test]
    fn test_unlock_of_free_identity_is_noop() {
        let mutex = UserMutex::new();
        mutex.unlock(&id("ghost"));
        assert_eq!(mutex.held_count(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mutex = UserMutex::new();
        {
            let guard = mutex.acquire(&id("a")).unwrap();
            assert_eq!(guard.id(), &id("a"));
            assert!(mutex.acquire(&id("a")).is_none());
        }
        assert!(!mutex.is_locked(&id("a")));
    }

    #[test]
    fn test_pair_is_all_or_nothing() {
        let mutex = UserMutex::new();
        let held = mutex.acquire(&id("b")).unwrap();

        let conflict = mutex.try_lock_pair(&id("a"), &id("b")).unwrap_err();
        assert_eq!(conflict, id("b"));
        assert!(!mutex.is_locked(&id("a")));

        drop(held);
        let pair = mutex.try_lock_pair(&id("a"), &id("b")).unwrap();
        assert!(pair.covers(&id("a")));
        assert!(pair.covers(&id("b")));
        assert!(!pair.covers(&id("c")));

        drop(pair);
        assert_eq!(mutex.held_count(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_guards() {
        let mutex = UserMutex::new();
        let held = mutex.acquire(&id("a")).unwrap();

        let waiter = tokio::spawn({
            let mutex = mutex.clone();
            async move {
                let _all = mutex.exclusive().await;
                mutex.held_count()
            }
        });
        tokio::task::yield_now().await;

        // pending exclusive hold turns new guards away
        assert!(mutex.acquire(&id("b")).is_none());
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), 0);
        assert!(mutex.acquire(&id("b")).is_some());
    }

    #[test]
    fn test_pair_on_single_identity() {
        let mutex = UserMutex::new();
        let pair = mutex.try_lock_pair(&id("a"), &id("a")).unwrap();
        assert!(pair.covers(&id("a")));
        assert_eq!(mutex.held_count(), 1);
    }
}
