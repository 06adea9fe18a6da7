//! In-memory agent store
//!
//! Keeps agents and the audit trail in process. Writes can be slowed down or
//! made to fail per identity, which lets tests reproduce interleavings and
//! rejected statements.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use chaos_types::{Agent, AgentId, AuditEntry};

use crate::{AgentStore, StoreError, StoreResult};

/// Process-local store. Transfers use the trait's compensating default.
#[derive(Clone, Default)]
pub struct InMemoryAgentStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
    audit: Arc<RwLock<Vec<AuditEntry>>>,
    faults: Arc<RwLock<HashSet<AgentId>>>,
    audit_fault: Arc<RwLock<bool>>,
    latency: Option<Duration>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write sleeps for `latency` before touching state
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or replace a record directly
    pub fn insert(&self, agent: Agent) {
        self.agents.write().insert(agent.id.clone(), agent);
    }

    /// Reject every subsequent write touching `id`
    pub fn fail_writes_for(&self, id: &AgentId) {
        self.faults.write().insert(id.clone());
    }

    /// Reject every subsequent audit append
    pub fn fail_audit(&self, fail: bool) {
        *self.audit_fault.write() = fail;
    }

    pub fn clear_faults(&self) {
        self.faults.write().clear();
        *self.audit_fault.write() = false;
    }

    /// Sum of every balance
    pub fn total_balance(&self) -> i64 {
        self.agents.read().values().map(|a| a.balance).sum()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_fault(&self, id: &AgentId) -> StoreResult<()> {
        if self.faults.read().contains(id) {
            return Err(StoreError::Unavailable(format!("writes to {id} rejected")));
        }
        Ok(())
    }

    async fn write<F>(&self, id: &AgentId, mutate: F) -> StoreResult<Agent>
    where
        F: FnOnce(&mut Agent) + Send,
    {
        self.pause().await;
        self.check_fault(id)?;

        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        mutate(agent);
        agent.last_updated = Utc::now();
        Ok(agent.clone())
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn get(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn exists(&self, id: &AgentId) -> StoreResult<bool> {
        Ok(self.agents.read().contains_key(id))
    }

    async fn create(&self, id: &AgentId) -> StoreResult<Agent> {
        self.pause().await;
        self.check_fault(id)?;

        let mut agents = self.agents.write();
        if agents.contains_key(id) {
            return Err(StoreError::Duplicate(id.to_string()));
        }
        let agent = Agent::new(id.clone());
        agents.insert(id.clone(), agent.clone());
        Ok(agent)
    }

    async fn set_balance(&self, id: &AgentId, balance: i64) -> StoreResult<Agent> {
        self.write(id, |a| a.balance = balance).await
    }

    async fn increase(&self, id: &AgentId, amount: i64) -> StoreResult<Agent> {
        self.write(id, |a| a.balance = a.balance.saturating_add(amount))
            .await
    }

    async fn decrease(&self, id: &AgentId, amount: i64) -> StoreResult<Agent> {
        self.write(id, |a| a.balance = a.balance.saturating_sub(amount))
            .await
    }

    async fn set_begged(&self, id: &AgentId, begged: bool) -> StoreResult<Agent> {
        self.write(id, |a| a.begged = begged).await
    }

    async fn set_punished(&self, id: &AgentId, punished: bool) -> StoreResult<Agent> {
        self.write(id, |a| a.punished = punished).await
    }

    async fn add_shame(&self, id: &AgentId, delta: i64) -> StoreResult<Agent> {
        self.write(id, |a| a.shame = a.shame.saturating_add(delta)).await
    }

    async fn list_all(&self) -> StoreResult<Vec<Agent>> {
        Ok(self.agents.read().values().cloned().collect())
    }

    async fn reset_all_balances(&self) -> StoreResult<u64> {
        self.pause().await;
        let mut agents = self.agents.write();
        let now = Utc::now();
        for agent in agents.values_mut() {
            agent.balance = 0;
            agent.last_updated = now;
        }
        Ok(agents.len() as u64)
    }

    async fn reset_all_begged_flags(&self) -> StoreResult<u64> {
        self.pause().await;
        let mut agents = self.agents.write();
        let now = Utc::now();
        for agent in agents.values_mut() {
            agent.begged = false;
            agent.last_updated = now;
        }
        Ok(agents.len() as u64)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        if *self.audit_fault.read() {
            return Err(StoreError::Unavailable("audit log rejected append".to_string()));
        }
        self.audit.write().push(entry.clone());
        Ok(())
    }

    async fn audit_trail(&self, target: &AgentId) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .audit
            .read()
            .iter()
            .rev()
            .filter(|e| &e.target_id == target)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_types::AuditField;

    fn id(s: &str) -> AgentId {
        AgentId::from(s)
    }

    #[tokio::test]
    async fn test_create_then_duplicate() {
        let store = InMemoryAgentStore::new();
        let agent = store.create(&id("a")).await.unwrap();
        assert_eq!(agent.balance, 0);

        let dup = store.create(&id("a")).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_increase_and_decrease() {
        let store = InMemoryAgentStore::new();
        store.create(&id("a")).await.unwrap();

        store.increase(&id("a"), 10).await.unwrap();
        let agent = store.decrease(&id("a"), 15).await.unwrap();
        assert_eq!(agent.balance, -5);
    }

    #[tokio::test]
    async fn test_write_to_missing_agent_is_not_found() {
        let store = InMemoryAgentStore::new();
        let result = store.increase(&id("ghost"), 1).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transfer_moves_points() {
        let store = InMemoryAgentStore::new();
        store.create(&id("a")).await.unwrap();
        store.create(&id("b")).await.unwrap();
        store.set_balance(&id("a"), 10).await.unwrap();

        let receipt = store.transfer(&id("a"), &id("b"), 4).await.unwrap();
        assert_eq!(receipt.payer.balance, 6);
        assert_eq!(receipt.payee.balance, 4);
        assert_eq!(store.total_balance(), 10);
    }

    #[tokio::test]
    async fn test_transfer_compensates_rejected_credit() {
        let store = InMemoryAgentStore::new();
        store.create(&id("a")).await.unwrap();
        store.create(&id("b")).await.unwrap();
        store.set_balance(&id("a"), 10).await.unwrap();
        store.fail_writes_for(&id("b"));

        let result = store.transfer(&id("a"), &id("b"), 4).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let a = store.get(&id("a")).await.unwrap().unwrap();
        let b = store.get(&id("b")).await.unwrap().unwrap();
        assert_eq!(a.balance, 10);
        assert_eq!(b.balance, 0);
    }

    #[tokio::test]
    async fn test_transfer_rejected_debit_touches_nothing() {
        let store = InMemoryAgentStore::new();
        store.create(&id("a")).await.unwrap();
        store.create(&id("b")).await.unwrap();
        store.fail_writes_for(&id("a"));

        assert!(store.transfer(&id("a"), &id("b"), 4).await.is_err());
        assert_eq!(store.total_balance(), 0);
    }

    #[tokio::test]
    async fn test_resets_touch_every_row() {
        let store = InMemoryAgentStore::new();
        for name in ["a", "b", "c"] {
            store.create(&id(name)).await.unwrap();
            store.set_balance(&id(name), 7).await.unwrap();
            store.set_begged(&id(name), true).await.unwrap();
        }

        assert_eq!(store.reset_all_balances().await.unwrap(), 3);
        assert_eq!(store.reset_all_begged_flags().await.unwrap(), 3);
        for agent in store.list_all().await.unwrap() {
            assert_eq!(agent.balance, 0);
            assert!(!agent.begged);
        }
    }

    #[tokio::test]
    async fn test_audit_trail_is_newest_first() {
        let store = InMemoryAgentStore::new();
        for (prev, new) in [(0, 5), (5, 9)] {
            store
                .append_audit(&AuditEntry::new(
                    id("admin"),
                    id("a"),
                    AuditField::SetBalance,
                    prev,
                    new,
                ))
                .await
                .unwrap();
        }

        let trail = store.audit_trail(&id("a")).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].new_value, "9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_writes() {
        let store = InMemoryAgentStore::new().with_latency(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        store.create(&id("a")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
