//! Chaos Ledger - Balance operations for the chaos economy
//!
//! The ledger is:
//! - Lazily populated (agents are created on first touch)
//! - Lock-disciplined (every mutation takes a guard from the [`UserMutex`])
//! - Delta-based (only administrative actions overwrite a balance)
//! - Audited (administrative mutations append to the audit trail)
//!
//! # Invariants
//!
//! 1. A mutation only runs while its identity is held in the registry
//! 2. A transfer's debit and credit are observed as one step
//! 3. Store failures surface as `StoreFailure` and are never retried

pub mod alms;
pub mod mutex;

use std::sync::Arc;

use tracing::{error, info, warn};

use chaos_store::{AgentStore, StoreError, TransferReceipt};
use chaos_types::{
    Actor, Agent, AgentId, AuditEntry, AuditField, Chance, ChaosError, RandomChance, Result,
};

pub use alms::{AlmsConfig, AlmsDesk, AlmsOutcome};
pub use mutex::{AgentLock, PairLock, UserMutex};

/// The chaos ledger
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn AgentStore>,
    locks: UserMutex,
    chance: Arc<dyn Chance>,
}

impl Ledger {
    /// Ledger with its own lock registry and a thread RNG
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self::with_parts(store, UserMutex::new(), Arc::new(RandomChance))
    }

    pub fn with_parts(store: Arc<dyn AgentStore>, locks: UserMutex, chance: Arc<dyn Chance>) -> Self {
        Self {
            store,
            locks,
            chance,
        }
    }

    pub fn locks(&self) -> &UserMutex {
        &self.locks
    }

    pub fn chance(&self) -> &Arc<dyn Chance> {
        &self.chance
    }

    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.store
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Hold `id` or fail with `Busy`
    pub fn lock(&self, id: &AgentId) -> Result<AgentLock> {
        self.locks.acquire(id).ok_or_else(|| ChaosError::busy(id))
    }

    /// Hold both identities or fail with `Busy` naming the one already held
    pub fn lock_pair(&self, a: &AgentId, b: &AgentId) -> Result<PairLock> {
        self.locks
            .try_lock_pair(a, b)
            .map_err(|held| ChaosError::busy(held))
    }

    fn check_lock(&self, lock: &AgentLock) -> Result<()> {
        if !lock.registry().same_registry(&self.locks) {
            return Err(ChaosError::internal(format!(
                "lock on {} was taken from another registry",
                lock.id()
            )));
        }
        Ok(())
    }

    fn check_pair(&self, pair: &PairLock, ids: [&AgentId; 2]) -> Result<()> {
        if !pair.registry().same_registry(&self.locks) {
            return Err(ChaosError::internal("pair lock was taken from another registry"));
        }
        for id in ids {
            if !pair.covers(id) {
                return Err(ChaosError::internal(format!("pair lock does not cover {id}")));
            }
        }
        Ok(())
    }

    fn failed(&self, op: &str, id: &AgentId, e: StoreError) -> ChaosError {
        if !matches!(e, StoreError::NotFound(_)) {
            error!(op, agent_id = %id, error = %e, "Store call failed");
        }
        e.into()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, id: &AgentId) -> Result<Option<Agent>> {
        self.store.get(id).await.map_err(|e| self.failed("get", id, e))
    }

    /// Fetch an agent, inserting a zero-balance row on first touch
    pub async fn get_or_create(&self, id: &AgentId) -> Result<Agent> {
        if let Some(agent) = self.get(id).await? {
            return Ok(agent);
        }
        match self.store.create(id).await {
            Ok(agent) => {
                info!(agent_id = %id, "Agent created");
                Ok(agent)
            }
            // Lost a creation race; the row is there now
            Err(StoreError::Duplicate(_)) => self
                .get(id)
                .await?
                .ok_or_else(|| ChaosError::AgentNotFound {
                    agent_id: id.to_string(),
                }),
            Err(e) => Err(self.failed("create", id, e)),
        }
    }

    /// Read-only view of a participant. Never creates a row.
    pub async fn inspect(&self, target: &Actor) -> Result<Option<Agent>> {
        reject_bot(target)?;
        self.get(&target.id).await
    }

    /// Agents ordered by balance, highest first
    pub async fn standings(&self, limit: usize) -> Result<Vec<Agent>> {
        let mut agents = self
            .store
            .list_all()
            .await
            .map_err(|e| self.failed("list_all", &AgentId::from("*"), e))?;
        agents.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.id.cmp(&b.id)));
        agents.truncate(limit);
        Ok(agents)
    }

    pub async fn audit_trail(&self, target: &AgentId) -> Result<Vec<AuditEntry>> {
        self.store
            .audit_trail(target)
            .await
            .map_err(|e| self.failed("audit_trail", target, e))
    }

    // ========================================================================
    // Guarded mutations
    // ========================================================================

    pub async fn increase(&self, lock: &AgentLock, amount: i64) -> Result<Agent> {
        self.check_lock(lock)?;
        self.store
            .increase(lock.id(), amount)
            .await
            .map_err(|e| self.failed("increase", lock.id(), e))
    }

    pub async fn decrease(&self, lock: &AgentLock, amount: i64) -> Result<Agent> {
        self.check_lock(lock)?;
        self.store
            .decrease(lock.id(), amount)
            .await
            .map_err(|e| self.failed("decrease", lock.id(), e))
    }

    /// Unconditional overwrite, for administrative actions
    pub async fn set_balance(&self, lock: &AgentLock, balance: i64) -> Result<Agent> {
        self.check_lock(lock)?;
        self.store
            .set_balance(lock.id(), balance)
            .await
            .map_err(|e| self.failed("set_balance", lock.id(), e))
    }

    pub async fn set_begged(&self, lock: &AgentLock, begged: bool) -> Result<Agent> {
        self.check_lock(lock)?;
        self.store
            .set_begged(lock.id(), begged)
            .await
            .map_err(|e| self.failed("set_begged", lock.id(), e))
    }

    pub async fn set_punished(&self, lock: &AgentLock, punished: bool) -> Result<Agent> {
        self.check_lock(lock)?;
        self.store
            .set_punished(lock.id(), punished)
            .await
            .map_err(|e| self.failed("set_punished", lock.id(), e))
    }

    pub async fn add_shame(&self, lock: &AgentLock, delta: i64) -> Result<Agent> {
        self.check_lock(lock)?;
        self.store
            .add_shame(lock.id(), delta)
            .await
            .map_err(|e| self.failed("add_shame", lock.id(), e))
    }

    /// Move `amount` from `payer` to `payee` as one step
    pub async fn transfer(
        &self,
        pair: &PairLock,
        payer: &AgentId,
        payee: &AgentId,
        amount: i64,
    ) -> Result<TransferReceipt> {
        self.check_pair(pair, [payer, payee])?;
        if amount <= 0 {
            return Err(ChaosError::invalid_input("amount", "must be positive"));
        }
        let receipt = self
            .store
            .transfer(payer, payee, amount)
            .await
            .map_err(|e| self.failed("transfer", payer, e))?;

        info!(
            payer = %payer,
            payee = %payee,
            amount,
            payer_balance = receipt.payer.balance,
            payee_balance = receipt.payee.balance,
            "Transfer settled"
        );
        Ok(receipt)
    }

    /// Append to the audit trail. Failures are logged and swallowed.
    pub async fn record_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            warn!(
                author = %entry.author_id,
                target = %entry.target_id,
                field = %entry.changed_field,
                error = %e,
                "Failed to record audit entry"
            );
        }
    }

    // ========================================================================
    // Actor-level operations
    // ========================================================================

    /// Award a random amount in `[min, max]`
    pub async fn reward(&self, actor: &Actor, min: i64, max: i64) -> Result<(i64, Agent)> {
        reject_bot(actor)?;
        if min < 0 || min > max {
            return Err(ChaosError::invalid_input(
                "reward",
                format!("range [{min}, {max}] is not a valid award"),
            ));
        }
        let lock = self.lock(&actor.id)?;
        self.get_or_create(&actor.id).await?;

        let amount = self.chance.roll(min, max);
        let agent = self.increase(&lock, amount).await?;
        info!(agent_id = %actor.id, amount, balance = agent.balance, "Reward granted");
        Ok((amount, agent))
    }

    /// Take the price of a paid action. The balance may land on zero but never
    /// below it.
    pub async fn charge(&self, actor: &Actor, cost: i64) -> Result<Agent> {
        reject_bot(actor)?;
        if cost <= 0 {
            return Err(ChaosError::invalid_input("cost", "must be positive"));
        }
        let lock = self.lock(&actor.id)?;
        let agent = self.get_or_create(&actor.id).await?;
        if agent.balance < cost {
            return Err(ChaosError::InsufficientBalance {
                agent_id: actor.id.to_string(),
                required: cost,
                available: agent.balance,
            });
        }

        let agent = self.decrease(&lock, cost).await?;
        info!(agent_id = %actor.id, cost, balance = agent.balance, "Action charged");
        Ok(agent)
    }

    pub async fn admin_set_balance(&self, author: &Actor, target: &Actor, value: i64) -> Result<Agent> {
        reject_bot(target)?;
        let lock = self.lock(&target.id)?;
        let before = self.get_or_create(&target.id).await?;
        let after = self.set_balance(&lock, value).await?;
        drop(lock);

        self.record_audit(AuditEntry::new(
            author.id.clone(),
            target.id.clone(),
            AuditField::SetBalance,
            before.balance,
            after.balance,
        ))
        .await;
        info!(author = %author.id, target = %target.id, before = before.balance, after = after.balance, "Balance overwritten");
        Ok(after)
    }

    pub async fn admin_set_begged(&self, author: &Actor, target: &Actor, begged: bool) -> Result<Agent> {
        reject_bot(target)?;
        let lock = self.lock(&target.id)?;
        let before = self.get_or_create(&target.id).await?;
        let after = self.set_begged(&lock, begged).await?;
        drop(lock);

        self.record_audit(AuditEntry::new(
            author.id.clone(),
            target.id.clone(),
            AuditField::BeggingState,
            before.begged,
            after.begged,
        ))
        .await;
        Ok(after)
    }

    pub async fn admin_set_punished(&self, author: &Actor, target: &Actor, punished: bool) -> Result<Agent> {
        reject_bot(target)?;
        let lock = self.lock(&target.id)?;
        let before = self.get_or_create(&target.id).await?;
        let after = self.set_punished(&lock, punished).await?;
        drop(lock);

        self.record_audit(AuditEntry::new(
            author.id.clone(),
            target.id.clone(),
            AuditField::PunishmentState,
            before.punished,
            after.punished,
        ))
        .await;
        Ok(after)
    }

    // ========================================================================
    // Season maintenance
    // ========================================================================

    /// Zero every balance. Waits for in-flight mutations to finish and turns
    /// new ones away as `Busy` until done.
    pub async fn reset_season(&self) -> Result<u64> {
        let _all = self.locks.exclusive().await;
        let touched = self
            .store
            .reset_all_balances()
            .await
            .map_err(|e| self.failed("reset_all_balances", &AgentId::from("*"), e))?;
        info!(agents = touched, "Season reset");
        Ok(touched)
    }

    /// Clear every daily begging flag
    pub async fn reset_begging(&self) -> Result<u64> {
        let _all = self.locks.exclusive().await;
        let touched = self
            .store
            .reset_all_begged_flags()
            .await
            .map_err(|e| self.failed("reset_all_begged_flags", &AgentId::from("*"), e))?;
        info!(agents = touched, "Begging flags reset");
        Ok(touched)
    }
}

/// Bots never hold a balance
pub fn reject_bot(actor: &Actor) -> Result<()> {
    if actor.is_bot {
        return Err(ChaosError::BotTarget {
            agent_id: actor.id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_store::InMemoryAgentStore;
    use chaos_types::{ErrorKind, ScriptedChance};

    fn ledger() -> (Ledger, InMemoryAgentStore) {
        let store = InMemoryAgentStore::new();
        let ledger = Ledger::with_parts(
            Arc::new(store.clone()),
            UserMutex::new(),
            Arc::new(ScriptedChance::always(true).with_roll(4)),
        );
        (ledger, store)
    }

    #[tokio::test]
    async fn test_get_or_create_inserts_zero_row() {
        let (ledger, store) = ledger();
        let agent = ledger.get_or_create(&AgentId::from("a")).await.unwrap();
        assert_eq!(agent.balance, 0);
        assert!(store.exists(&AgentId::from("a")).await.unwrap());

        let again = ledger.get_or_create(&AgentId::from("a")).await.unwrap();
        assert_eq!(again.created_at, agent.created_at);
    }

    #[tokio::test]
    async fn test_mutations_need_own_registry() {
        let (ledger, _) = ledger();
        ledger.get_or_create(&AgentId::from("a")).await.unwrap();

        let foreign = UserMutex::new().acquire(&AgentId::from("a")).unwrap();
        let err = ledger.increase(&foreign, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
    }

    #[tokio::test]
    async fn test_lock_conflict_is_busy() {
        let (ledger, _) = ledger();
        let _held = ledger.lock(&AgentId::from("a")).unwrap();

        let err = ledger.lock(&AgentId::from("a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        let err = ledger
            .lock_pair(&AgentId::from("b"), &AgentId::from("a"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(!ledger.locks().is_locked(&AgentId::from("b")));
    }

    #[tokio::test]
    async fn test_decrease_may_go_negative() {
        let (ledger, _) = ledger();
        let id = AgentId::from("a");
        ledger.get_or_create(&id).await.unwrap();

        let lock = ledger.lock(&id).unwrap();
        let agent = ledger.decrease(&lock, 7).await.unwrap();
        assert_eq!(agent.balance, -7);
    }

    #[tokio::test]
    async fn test_transfer_requires_both_identities() {
        let (ledger, _) = ledger();
        for name in ["a", "b", "c"] {
            ledger.get_or_create(&AgentId::from(name)).await.unwrap();
        }
        let pair = ledger
            .lock_pair(&AgentId::from("a"), &AgentId::from("b"))
            .unwrap();

        let err = ledger
            .transfer(&pair, &AgentId::from("a"), &AgentId::from("c"), 3)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");

        let receipt = ledger
            .transfer(&pair, &AgentId::from("a"), &AgentId::from("b"), 3)
            .await
            .unwrap();
        assert_eq!(receipt.payer.balance, -3);
        assert_eq!(receipt.payee.balance, 3);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (ledger, store) = ledger();
        let id = AgentId::from("a");
        ledger.get_or_create(&id).await.unwrap();
        store.fail_writes_for(&id);

        let lock = ledger.lock(&id).unwrap();
        let err = ledger.increase(&lock, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
    }

    #[tokio::test]
    async fn test_admin_set_balance_is_audited() {
        let (ledger, _) = ledger();
        let admin = Actor::user("admin");
        let target = Actor::user("a");

        ledger.admin_set_balance(&admin, &target, 12).await.unwrap();
        ledger.admin_set_balance(&admin, &target, 30).await.unwrap();

        let trail = ledger.audit_trail(&target.id).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].changed_field, AuditField::SetBalance);
        assert_eq!(trail[0].previous_value, "12");
        assert_eq!(trail[0].new_value, "30");
        assert!(!ledger.locks().is_locked(&target.id));
    }

    #[tokio::test]
    async fn test_admin_flags_are_audited() {
        let (ledger, _) = ledger();
        let admin = Actor::user("admin");
        let target = Actor::user("a");

        let agent = ledger.admin_set_begged(&admin, &target, true).await.unwrap();
        assert!(agent.begged);
        let agent = ledger.admin_set_punished(&admin, &target, true).await.unwrap();
        assert!(agent.punished);

        let trail = ledger.audit_trail(&target.id).await.unwrap();
        assert_eq!(trail[0].changed_field, AuditField::PunishmentState);
        assert_eq!(trail[1].changed_field, AuditField::BeggingState);
        assert_eq!(trail[1].previous_value, "false");
        assert_eq!(trail[1].new_value, "true");
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_undo_mutation() {
        let (ledger, store) = ledger();
        store.fail_audit(true);

        let agent = ledger
            .admin_set_balance(&Actor::user("admin"), &Actor::user("a"), 9)
            .await
            .unwrap();
        assert_eq!(agent.balance, 9);
        assert!(ledger.audit_trail(&AgentId::from("a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bots_are_rejected() {
        let (ledger, _) = ledger();
        let bot = Actor::bot("neco");

        let err = ledger
            .admin_set_balance(&Actor::user("admin"), &bot, 5)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "BOT_TARGET");
        assert!(ledger.inspect(&bot).await.is_err());
        assert!(ledger.reward(&bot, 1, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_inspect_never_creates() {
        let (ledger, store) = ledger();
        let view = ledger.inspect(&Actor::user("a")).await.unwrap();
        assert!(view.is_none());
        assert!(!store.exists(&AgentId::from("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reward_uses_roll() {
        let (ledger, _) = ledger();
        let (amount, agent) = ledger.reward(&Actor::user("a"), 1, 10).await.unwrap();
        assert_eq!(amount, 4);
        assert_eq!(agent.balance, 4);
    }

    #[tokio::test]
    async fn test_charge_may_empty_the_balance() {
        let (ledger, _) = ledger();
        ledger.admin_set_balance(&Actor::user("admin"), &Actor::user("a"), 2).await.unwrap();

        let agent = ledger.charge(&Actor::user("a"), 2).await.unwrap();
        assert_eq!(agent.balance, 0);
        assert!(!ledger.locks().is_locked(&AgentId::from("a")));
    }

    #[tokio::test]
    async fn test_charge_one_short_changes_nothing() {
        let (ledger, _) = ledger();
        ledger.admin_set_balance(&Actor::user("admin"), &Actor::user("a"), 1).await.unwrap();

        let err = ledger.charge(&Actor::user("a"), 2).await.unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
        let agent = ledger.get(&AgentId::from("a")).await.unwrap().unwrap();
        assert_eq!(agent.balance, 1);
    }

    #[tokio::test]
    async fn test_charge_refuses_bots_and_held_identities() {
        let (ledger, _) = ledger();
        let err = ledger.charge(&Actor::bot("neco"), 1).await.unwrap_err();
        assert_eq!(err.error_code(), "BOT_TARGET");

        ledger.admin_set_balance(&Actor::user("admin"), &Actor::user("a"), 5).await.unwrap();
        let held = ledger.lock(&AgentId::from("a")).unwrap();
        let err = ledger.charge(&Actor::user("a"), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);

        drop(held);
        assert_eq!(ledger.charge(&Actor::user("a"), 1).await.unwrap().balance, 4);
    }

    #[tokio::test]
    async fn test_standings_are_sorted() {
        let (ledger, _) = ledger();
        let admin = Actor::user("admin");
        for (name, balance) in [("a", 3), ("b", 9), ("c", -1), ("d", 9)] {
            ledger
                .admin_set_balance(&admin, &Actor::user(name), balance)
                .await
                .unwrap();
        }

        let top: Vec<_> = ledger
            .standings(3)
            .await
            .unwrap()
            .into_iter()
            .map(|a| (a.id.to_string(), a.balance))
            .collect();
        assert_eq!(
            top,
            vec![("b".to_string(), 9), ("d".to_string(), 9), ("a".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_resets() {
        let (ledger, _) = ledger();
        let admin = Actor::user("admin");
        ledger.admin_set_balance(&admin, &Actor::user("a"), 40).await.unwrap();
        ledger.admin_set_begged(&admin, &Actor::user("a"), true).await.unwrap();

        assert_eq!(ledger.reset_season().await.unwrap(), 1);
        assert_eq!(ledger.reset_begging().await.unwrap(), 1);
        let agent = ledger.get(&AgentId::from("a")).await.unwrap().unwrap();
        assert_eq!(agent.balance, 0);
        assert!(!agent.begged);
    }
}
