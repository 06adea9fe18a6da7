//! Chaos Economy Server
//!
//! Hosts the economy core: the balance ledger, offer negotiation and the
//! weekly lottery, plus the recurring season jobs.
//!
//! # Usage
//!
//! ```bash
//! # Start against PostgreSQL from DATABASE_URL
//! chaos-server
//!
//! # Keep everything in memory
//! chaos-server --in-memory
//!
//! # Start with environment overrides
//! CHAOS__LOTTERY__WINDOW_SECS=60 chaos-server --config /path/to/chaos.toml
//! ```

mod config;
mod jobs;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chaos_ledger::Ledger;
use chaos_lottery::LotteryEngine;
use chaos_negotiation::NegotiationEngine;
use chaos_notify::{Notifier, TracingNotifier};
use chaos_store::{AgentStore, InMemoryAgentStore, PgAgentStore, StoreConfig};

use crate::config::ChaosConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chaos Economy Server
#[derive(Parser, Debug)]
#[command(name = "chaos-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "CHAOS_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CHAOS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "CHAOS_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Keep balances in process memory
    #[arg(long, env = "CHAOS_IN_MEMORY")]
    in_memory: bool,
}

/// Everything a chat front end talks to
struct Economy {
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    negotiation: NegotiationEngine,
    lottery: LotteryEngine,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut chaos_config = ChaosConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(url) = args.database_url {
        chaos_config.database.url = url;
    }
    if args.in_memory {
        chaos_config.database.in_memory = true;
    }
    if let Some(level) = args.log_level {
        chaos_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        chaos_config.logging.format = format;
    }

    init_logging(&chaos_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Chaos Economy Server"
    );

    chaos_config.validate()?;

    let store = init_store(&chaos_config.database).await?;
    let economy = init_economy(&chaos_config, store);

    let season = jobs::register(
        &chaos_config.schedule,
        economy.ledger.clone(),
        economy.notifier.clone(),
        economy.lottery.clone(),
    )?;

    tracing::info!(
        daily_reset = %chaos_config.schedule.daily_reset,
        weekly_standings = %chaos_config.schedule.weekly_standings,
        weekly_lottery = %chaos_config.schedule.weekly_lottery,
        timezone = %chaos_config.schedule.timezone,
        "Season jobs armed"
    );

    shutdown_signal().await;

    for job in &season {
        job.disarm();
    }
    tracing::info!(
        open_offers = economy.negotiation.open_count(),
        "Server shutdown complete"
    );

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

/// Pick and connect the agent store
async fn init_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn AgentStore>> {
    if config.in_memory {
        tracing::warn!("Using the in-memory store; balances are lost on exit");
        return Ok(Arc::new(InMemoryAgentStore::new()));
    }

    tracing::info!("Connecting to database...");
    let store = PgAgentStore::connect(config).await?;
    tracing::info!("Database connected successfully");
    Ok(Arc::new(store))
}

fn init_economy(config: &ChaosConfig, store: Arc<dyn AgentStore>) -> Economy {
    let ledger = Ledger::new(store);
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier::new());

    let economy = Economy {
        negotiation: NegotiationEngine::new(ledger.clone(), notifier.clone(), config.economy.clone()),
        lottery: LotteryEngine::new(ledger.clone(), notifier.clone(), config.lottery.clone()),
        ledger,
        notifier,
    };
    tracing::info!(
        offer_window_secs = config.economy.offer_window_secs,
        lottery_window_secs = config.lottery.window_secs,
        "Economy initialized"
    );
    economy
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["chaos-server", "--in-memory", "--log-format", "json"]);
        assert!(args.in_memory);
        assert_eq!(args.log_format.as_deref(), Some("json"));
    }

    #[tokio::test]
    async fn test_in_memory_store_needs_no_database() {
        let config = StoreConfig {
            in_memory: true,
            ..StoreConfig::default()
        };
        let store = init_store(&config).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_economy_shares_one_lock_registry() {
        let config = ChaosConfig::default();
        let economy = init_economy(&config, Arc::new(InMemoryAgentStore::new()));
        assert_eq!(economy.negotiation.open_count(), 0);

        let id = chaos_types::AgentId::from("a");
        let _held = economy.ledger.lock(&id).unwrap();
        let err = economy.negotiation.ledger().lock(&id).unwrap_err();
        assert_eq!(err.error_code(), "BUSY");
    }
}
