use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use observatory_core::{Config, ExchangeRegistry, MemoryStore, Monitor, MonitorError, MonitorStatus};

#[derive(Parser, Debug)]
#[command(name = "observatory", about = "Cross-exchange arbitrage monitor")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Seconds between status summaries in the log
    #[arg(long, default_value_t = 300)]
    status_every: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("🚀 Arbitrage observatory starting...");

    let config = Config::load(&cli.config);
    info!(
        "Configuration loaded: exchanges={:?}, pairs={:?}, min_profit={}%",
        config.monitor.exchanges, config.monitor.pairs, config.detector.min_profit_pct
    );

    let store = Arc::new(MemoryStore::new());
    let mut monitor = Monitor::new(Arc::new(ExchangeRegistry::with_defaults()), store);

    match monitor.start(config).await {
        Ok(()) => {}
        Err(MonitorError::FatalStartup {
            available,
            required,
        }) => {
            error!(
                "Need at least {} exchanges to monitor, only {} reachable. Exiting.",
                required, available
            );
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to start monitor: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.status_every.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = ticker.tick() => {
                log_status(&monitor.status().await);
            }
        }
    }

    monitor.stop().await;
    log_status(&monitor.status().await);
    ExitCode::SUCCESS
}

fn log_status(status: &MonitorStatus) {
    let active = status
        .exchanges
        .iter()
        .filter(|h| h.status == observatory_core::ExchangeStatus::Active)
        .count();

    let Some(stats) = &status.stats else {
        info!(
            "📊 state={:?} cycles={} failed={} active_exchanges={}",
            status.state, status.cycles_completed, status.cycles_failed, active
        );
        return;
    };

    let now = Utc::now();
    info!(
        "📊 state={:?} cycles={} failed={} active_exchanges={} | \
         opportunities={} avg={}% best={}% per_hour={} uptime={}m",
        status.state,
        status.cycles_completed,
        status.cycles_failed,
        active,
        stats.total_opportunities,
        stats.average_profit_pct().round_dp(3),
        stats
            .best_opportunity_pct
            .map(|b| b.round_dp(3).to_string())
            .unwrap_or_else(|| "-".to_string()),
        stats.opportunities_per_hour(now).round_dp(2),
        stats.uptime(now).num_minutes()
    );
}
