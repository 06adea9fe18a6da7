//! Chaos Store - Agent persistence
//!
//! The economy consumes a CRUD-style store with atomic increments. Two
//! implementations ship here:
//!
//! - **PgAgentStore**: PostgreSQL via SQLx; increments are single
//!   `balance = balance ± $1` statements and transfers run in one transaction
//! - **InMemoryAgentStore**: process-local maps for tests and dev mode
//!
//! # Transfers
//!
//! `AgentStore::transfer` has a default implementation that debits, credits,
//! and compensates the debit if the credit is rejected. Stores with real
//! transactions override it.

pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use tracing::{error, warn};

use chaos_types::{Agent, AgentId, AuditEntry};

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryAgentStore;
pub use postgres::PgAgentStore;

/// Both sides of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub payer: Agent,
    pub payee: Agent,
}

/// Persistence contract for agent records
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch an agent
    async fn get(&self, id: &AgentId) -> StoreResult<Option<Agent>>;

    /// Check whether an agent row exists
    async fn exists(&self, id: &AgentId) -> StoreResult<bool>;

    /// Insert a zero-balance agent. Fails with `Duplicate` if present.
    async fn create(&self, id: &AgentId) -> StoreResult<Agent>;

    /// Overwrite the balance
    async fn set_balance(&self, id: &AgentId, balance: i64) -> StoreResult<Agent>;

    /// Atomically add to the balance
    async fn increase(&self, id: &AgentId, amount: i64) -> StoreResult<Agent>;

    /// Atomically subtract from the balance
    async fn decrease(&self, id: &AgentId, amount: i64) -> StoreResult<Agent>;

    /// Set the daily begging flag
    async fn set_begged(&self, id: &AgentId, begged: bool) -> StoreResult<Agent>;

    /// Set the punishment flag
    async fn set_punished(&self, id: &AgentId, punished: bool) -> StoreResult<Agent>;

    /// Atomically add to the shame counter
    async fn add_shame(&self, id: &AgentId, delta: i64) -> StoreResult<Agent>;

    /// Every agent
    async fn list_all(&self) -> StoreResult<Vec<Agent>>;

    /// Zero every balance; returns the number of rows touched
    async fn reset_all_balances(&self) -> StoreResult<u64>;

    /// Clear every begging flag; returns the number of rows touched
    async fn reset_all_begged_flags(&self) -> StoreResult<u64>;

    /// Append an audit entry
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Audit entries targeting an agent, newest first
    async fn audit_trail(&self, target: &AgentId) -> StoreResult<Vec<AuditEntry>>;

    /// Move `amount` from `payer` to `payee` as one step.
    ///
    /// Default: debit, then credit; if the credit is rejected the debit is
    /// reversed before the credit error is returned.
    async fn transfer(
        &self,
        payer: &AgentId,
        payee: &AgentId,
        amount: i64,
    ) -> StoreResult<TransferReceipt> {
        let debited = self.decrease(payer, amount).await?;

        match self.increase(payee, amount).await {
            Ok(credited) => Ok(TransferReceipt {
                payer: debited,
                payee: credited,
            }),
            Err(credit_err) => {
                warn!(
                    payer = %payer,
                    payee = %payee,
                    amount,
                    error = %credit_err,
                    "Credit leg rejected, reversing debit"
                );
                match self.increase(payer, amount).await {
                    Ok(_) => Err(credit_err),
                    Err(comp_err) => {
                        error!(
                            payer = %payer,
                            payee = %payee,
                            amount,
                            error = %comp_err,
                            "Compensating credit rejected"
                        );
                        Err(StoreError::Inconsistent {
                            payer: payer.to_string(),
                            payee: payee.to_string(),
                            amount,
                            reason: format!(
                                "credit failed ({credit_err}); compensation failed ({comp_err})"
                            ),
                        })
                    }
                }
            }
        }
    }
}
