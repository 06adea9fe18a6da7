//! Chaos Scheduler - Timers for the chaos economy
//!
//! - [`after`]: fire-once task, disarmed by a competing transition
//! - [`cron`]: recurring job driven by a [`Schedule`]
//!
//! Schedules are read on the wall clock of an IANA time zone; see [`timezone`].

pub mod cron;
pub mod error;
pub mod timer;

pub use chrono_tz::Tz;
pub use cron::Schedule;
pub use error::{ScheduleError, ScheduleResult};
pub use timer::{after, cron, TimerHandle};

/// Look up an IANA time zone such as `Europe/Madrid`
pub fn timezone(name: &str) -> ScheduleResult<Tz> {
    name.parse::<Tz>().map_err(|_| ScheduleError::UnknownTimezone {
        name: name.to_string(),
    })
}
