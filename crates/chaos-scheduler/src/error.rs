//! Scheduler errors

use chaos_types::ChaosError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("{field} value {value} outside [{min}, {max}]")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Unknown time zone '{name}'")]
    UnknownTimezone { name: String },
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

impl From<ScheduleError> for ChaosError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidExpression { expression, reason } => {
                ChaosError::invalid_input("schedule", format!("{expression}: {reason}"))
            }
            other => ChaosError::invalid_input("schedule", other.to_string()),
        }
    }
}
