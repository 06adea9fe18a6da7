//! Error types for the chaos economy
//!
//! Every rejected path carries one of these; callers never see a silently
//! dropped request.

use thiserror::Error;

/// Result type for chaos economy operations
pub type Result<T> = std::result::Result<T, ChaosError>;

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Agent missing (normally resolved by lazy creation)
    NotFound,
    /// Bad input: points out of range, self/bot target, duplicate pick
    InvalidArgument,
    /// A per-identity lock is already held
    Busy,
    /// The persistence layer rejected a call
    StoreFailure,
    /// A transition attempted after resolution; swallowed by callers
    ProtocolViolation,
    /// The notifier could not deliver a message
    Delivery,
}

/// Chaos economy error types
#[derive(Debug, Clone, Error)]
pub enum ChaosError {
    // ========================================================================
    // Agent Errors
    // ========================================================================

    /// Agent not found
    #[error("Agent {agent_id} not found")]
    AgentNotFound { agent_id: String },

    /// Bot accounts never take part in the economy
    #[error("Agent {agent_id} is a bot and cannot take part")]
    BotTarget { agent_id: String },

    /// Balance too low for the requested movement
    #[error("Insufficient balance for agent {agent_id}: requested {required}, available {available}")]
    InsufficientBalance {
        agent_id: String,
        required: i64,
        available: i64,
    },

    // ========================================================================
    // Concurrency Errors
    // ========================================================================

    /// Identity already locked by another economic operation
    #[error("Agent {agent_id} is busy with another operation")]
    Busy { agent_id: String },

    // ========================================================================
    // Protocol Errors
    // ========================================================================

    /// Terminal transition attempted on a resolved offer
    #[error("Offer {offer_id} is already {state}")]
    OfferAlreadyResolved { offer_id: String, state: String },

    /// Lottery window no longer accepting picks
    #[error("Lottery window {window_id} is closed")]
    WindowClosed { window_id: String },

    /// Second pick from the same participant
    #[error("Agent {agent_id} already picked in window {window_id}")]
    DuplicatePick { agent_id: String, window_id: String },

    // ========================================================================
    // Infrastructure Errors
    // ========================================================================

    /// Persistence call rejected
    #[error("Store failure: {message}")]
    Store { message: String },

    /// A transfer leg failed and the compensating leg failed too
    #[error("Transfer of {amount} from {payer} to {payee} left the ledger inconsistent: {reason}")]
    TransferInconsistent {
        payer: String,
        payee: String,
        amount: i64,
        reason: String,
    },

    /// Notifier could not deliver
    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ChaosError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a store failure
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a busy error for an identity
    pub fn busy(agent_id: impl ToString) -> Self {
        Self::Busy {
            agent_id: agent_id.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentNotFound { .. } => ErrorKind::NotFound,
            Self::BotTarget { .. }
            | Self::InsufficientBalance { .. }
            | Self::DuplicatePick { .. }
            | Self::InvalidInput { .. } => ErrorKind::InvalidArgument,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::OfferAlreadyResolved { .. } | Self::WindowClosed { .. } => {
                ErrorKind::ProtocolViolation
            }
            Self::Store { .. } | Self::TransferInconsistent { .. } | Self::Internal { .. } => {
                ErrorKind::StoreFailure
            }
            Self::Delivery { .. } => ErrorKind::Delivery,
        }
    }

    /// Stale events after resolution are expected and must be ignored
    pub fn is_protocol_violation(&self) -> bool {
        self.kind() == ErrorKind::ProtocolViolation
    }

    /// Get an error code for logs and replies
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            Self::BotTarget { .. } => "BOT_TARGET",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::Busy { .. } => "BUSY",
            Self::OfferAlreadyResolved { .. } => "OFFER_ALREADY_RESOLVED",
            Self::WindowClosed { .. } => "WINDOW_CLOSED",
            Self::DuplicatePick { .. } => "DUPLICATE_PICK",
            Self::Store { .. } => "STORE_FAILURE",
            Self::TransferInconsistent { .. } => "TRANSFER_INCONSISTENT",
            Self::Delivery { .. } => "DELIVERY_FAILED",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
