//! Database row models

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use chaos_types::{Agent, AgentId, AuditEntry, AuditField};

use crate::StoreError;

/// Row of the `agents` table
#[derive(Debug, Clone, FromRow)]
pub struct DbAgent {
    pub id: String,
    pub balance: i64,
    pub shame: i64,
    pub begged: bool,
    pub punished: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl From<DbAgent> for Agent {
    fn from(row: DbAgent) -> Self {
        Agent {
            id: AgentId(row.id),
            balance: row.balance,
            shame: row.shame,
            begged: row.begged,
            punished: row.punished,
            created_at: row.created_at,
            last_updated: row.last_updated,
        }
    }
}

/// Row of the `audit_log` table
#[derive(Debug, Clone, FromRow)]
pub struct DbAuditLog {
    pub id: i64,
    pub author_id: String,
    pub target_id: String,
    pub changed_field: String,
    pub previous_value: String,
    pub new_value: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbAuditLog> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: DbAuditLog) -> Result<Self, Self::Error> {
        let changed_field = AuditField::parse(&row.changed_field).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "audit row {} has unknown field {}",
                row.id, row.changed_field
            ))
        })?;
        Ok(AuditEntry {
            author_id: AgentId(row.author_id),
            target_id: AgentId(row.target_id),
            changed_field,
            previous_value: row.previous_value,
            new_value: row.new_value,
            timestamp: row.created_at,
        })
    }
}
