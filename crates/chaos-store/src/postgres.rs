//! PostgreSQL agent store

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use chaos_types::{Agent, AgentId, AuditEntry};

use crate::models::{DbAgent, DbAuditLog};
use crate::{AgentStore, StoreConfig, StoreError, StoreResult, TransferReceipt};

const AGENT_COLUMNS: &str = "id, balance, shame, begged, punished, created_at, last_updated";

/// Agent store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgAgentStore {
    pool: PgPool,
}

impl PgAgentStore {
    /// Connect and optionally run migrations
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.url_masked());

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        let store = Self::from_pool(pool);
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn update_returning(&self, sql: &str, id: &AgentId, value: i64) -> StoreResult<Agent> {
        let row = sqlx::query_as::<_, DbAgent>(sql)
            .bind(value)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(row.into())
    }

    async fn update_flag(&self, sql: &str, id: &AgentId, value: bool) -> StoreResult<Agent> {
        let row = sqlx::query_as::<_, DbAgent>(sql)
            .bind(value)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(row.into())
    }
}

#[async_trait]
impl AgentStore for PgAgentStore {
    async fn get(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Agent::from))
    }

    async fn exists(&self, id: &AgentId) -> StoreResult<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM agents WHERE id = $1)")
                .bind(id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    async fn create(&self, id: &AgentId) -> StoreResult<Agent> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            r#"
            INSERT INTO agents (id)
            VALUES ($1)
            ON CONFLICT (id) DO NOTHING
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::Duplicate(id.to_string()))?;

        Ok(row.into())
    }

    async fn set_balance(&self, id: &AgentId, balance: i64) -> StoreResult<Agent> {
        self.update_returning(
            &format!(
                "UPDATE agents SET balance = $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
            ),
            id,
            balance,
        )
        .await
    }

    async fn increase(&self, id: &AgentId, amount: i64) -> StoreResult<Agent> {
        self.update_returning(
            &format!(
                "UPDATE agents SET balance = balance + $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
            ),
            id,
            amount,
        )
        .await
    }

    async fn decrease(&self, id: &AgentId, amount: i64) -> StoreResult<Agent> {
        self.update_returning(
            &format!(
                "UPDATE agents SET balance = balance - $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
            ),
            id,
            amount,
        )
        .await
    }

    async fn set_begged(&self, id: &AgentId, begged: bool) -> StoreResult<Agent> {
        self.update_flag(
            &format!(
                "UPDATE agents SET begged = $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
            ),
            id,
            begged,
        )
        .await
    }

    async fn set_punished(&self, id: &AgentId, punished: bool) -> StoreResult<Agent> {
        self.update_flag(
            &format!(
                "UPDATE agents SET punished = $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
            ),
            id,
            punished,
        )
        .await
    }

    async fn add_shame(&self, id: &AgentId, delta: i64) -> StoreResult<Agent> {
        self.update_returning(
            &format!(
                "UPDATE agents SET shame = shame + $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
            ),
            id,
            delta,
        )
        .await
    }

    async fn list_all(&self) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents ORDER BY balance DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Agent::from).collect())
    }

    async fn reset_all_balances(&self) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE agents SET balance = 0, last_updated = NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn reset_all_begged_flags(&self) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE agents SET begged = FALSE, last_updated = NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (author_id, target_id, changed_field, previous_value, new_value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.author_id.as_str())
        .bind(entry.target_id.as_str())
        .bind(entry.changed_field.as_str())
        .bind(&entry.previous_value)
        .bind(&entry.new_value)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn audit_trail(&self, target: &AgentId) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, DbAuditLog>(
            r#"
            SELECT id, author_id, target_id, changed_field, previous_value, new_value, created_at
            FROM audit_log
            WHERE target_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(target.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    /// Both legs commit or neither does.
    async fn transfer(
        &self,
        payer: &AgentId,
        payee: &AgentId,
        amount: i64,
    ) -> StoreResult<TransferReceipt> {
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query_as::<_, DbAgent>(&format!(
            "UPDATE agents SET balance = balance - $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
        ))
        .bind(amount)
        .bind(payer.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(payer.to_string()))?;

        let credited = sqlx::query_as::<_, DbAgent>(&format!(
            "UPDATE agents SET balance = balance + $1, last_updated = NOW() WHERE id = $2 RETURNING {AGENT_COLUMNS}"
        ))
        .bind(amount)
        .bind(payee.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(payee.to_string()))?;

        tx.commit().await?;

        Ok(TransferReceipt {
            payer: debited.into(),
            payee: credited.into(),
        })
    }
}
