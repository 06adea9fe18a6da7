//! Agent records and the administrative audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AgentId;

/// The economic identity record for a chat user.
///
/// Balances are signed: self-punishment and unchecked requests can push an
/// agent below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub balance: i64,
    pub shame: i64,
    pub begged: bool,
    pub punished: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Agent {
    /// A freshly created agent with a zero balance
    pub fn new(id: AgentId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            shame: 0,
            begged: false,
            punished: false,
            created_at: now,
            last_updated: now,
        }
    }
}

/// Field touched by an administrative mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditField {
    SetBalance,
    BeggingState,
    PunishmentState,
}

impl AuditField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetBalance => "set_balance",
            Self::BeggingState => "begging_state",
            Self::PunishmentState => "punishment_state",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set_balance" => Some(Self::SetBalance),
            "begging_state" => Some(Self::BeggingState),
            "punishment_state" => Some(Self::PunishmentState),
            _ => None,
        }
    }
}

impl fmt::Display for AuditField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of an administrative mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub author_id: AgentId,
    pub target_id: AgentId,
    pub changed_field: AuditField,
    pub previous_value: String,
    pub new_value: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        author_id: AgentId,
        target_id: AgentId,
        changed_field: AuditField,
        previous_value: impl ToString,
        new_value: impl ToString,
    ) -> Self {
        Self {
            author_id,
            target_id,
            changed_field,
            previous_value: previous_value.to_string(),
            new_value: new_value.to_string(),
            timestamp: Utc::now(),
        }
    }
}
