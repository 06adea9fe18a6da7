//! Store error types

use chaos_types::ChaosError;
use thiserror::Error;

/// Store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Transfer of {amount} from {payer} to {payee} is inconsistent: {reason}")]
    Inconsistent {
        payer: String,
        payee: String,
        amount: i64,
        reason: String,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ChaosError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(agent_id) => ChaosError::AgentNotFound { agent_id },
            StoreError::Inconsistent {
                payer,
                payee,
                amount,
                reason,
            } => ChaosError::TransferInconsistent {
                payer,
                payee,
                amount,
                reason,
            },
            other => ChaosError::store(other.to_string()),
        }
    }
}
