//! Notifier error types

use chaos_types::{ChaosError, PromptId};
use thiserror::Error;

/// Notifier errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Prompt {0} is unknown")]
    UnknownPrompt(PromptId),

    #[error("Prompt {0} is closed")]
    PromptClosed(PromptId),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

impl From<NotifyError> for ChaosError {
    fn from(e: NotifyError) -> Self {
        ChaosError::Delivery {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_types::ErrorKind;

    #[test]
    fn test_maps_to_delivery_kind() {
        let err: ChaosError = NotifyError::PromptClosed(PromptId::new()).into();
        assert_eq!(err.kind(), ErrorKind::Delivery);
        assert_eq!(err.error_code(), "DELIVERY_FAILED");
    }
}
