//! Server Configuration
//!
//! Layered from an optional file, `config/default`, `config/local` and
//! `CHAOS__*` environment variables, in that order of precedence (lowest first).

use serde::{Deserialize, Serialize};

use chaos_ledger::AlmsConfig;
use chaos_lottery::LotteryConfig;
use chaos_negotiation::NegotiationConfig;
use chaos_scheduler::{timezone, Schedule};
use chaos_store::StoreConfig;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub database: StoreConfig,

    /// Offer window and point bounds
    #[serde(default)]
    pub economy: NegotiationConfig,

    #[serde(default)]
    pub alms: AlmsConfig,

    #[serde(default)]
    pub lottery: LotteryConfig,

    /// Recurring season jobs
    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cron expressions for the season jobs, read on the wall clock of `timezone`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Clears every begging flag
    #[serde(default = "default_daily_reset")]
    pub daily_reset: String,

    /// Announces the standings and zeroes every balance
    #[serde(default = "default_weekly_standings")]
    pub weekly_standings: String,

    /// Opens the weekly lottery window
    #[serde(default = "default_weekly_lottery")]
    pub weekly_lottery: String,

    /// IANA time zone name
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Entries in the weekly standings
    #[serde(default = "default_standings_size")]
    pub standings_size: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_reset: default_daily_reset(),
            weekly_standings: default_weekly_standings(),
            weekly_lottery: default_weekly_lottery(),
            timezone: default_timezone(),
            standings_size: default_standings_size(),
        }
    }
}

fn default_daily_reset() -> String {
    "0 12 * * *".to_string()
}

fn default_weekly_standings() -> String {
    "0 15 * * SUN".to_string()
}

fn default_weekly_lottery() -> String {
    "3 23 * * FRI".to_string()
}

fn default_timezone() -> String {
    "Europe/Madrid".to_string()
}

fn default_standings_size() -> usize {
    5
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ChaosConfig {
    /// Load configuration from files and environment
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        // CHAOS__LOTTERY__WINDOW_SECS=60 and friends
        builder = builder.add_source(
            config::Environment::with_prefix("CHAOS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Reject settings the economy cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.economy.validate()?;
        self.alms.validate()?;
        self.lottery.validate()?;

        for expression in [
            &self.schedule.daily_reset,
            &self.schedule.weekly_standings,
            &self.schedule.weekly_lottery,
        ] {
            expression.parse::<Schedule>()?;
        }
        timezone(&self.schedule.timezone)?;

        if self.schedule.standings_size == 0 {
            anyhow::bail!("schedule.standings_size must be at least 1");
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            anyhow::bail!("logging.format must be 'json' or 'pretty'");
        }
        Ok(())
    }
}
