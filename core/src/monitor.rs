use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregator::collect_cycle;
use crate::arbitrage::detect;
use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::exchange::{ExchangeClientPool, ExchangeRegistry};
use crate::stats::{load_or_init_stats, record_opportunities, sweep_retention};
use crate::store::Store;
use crate::types::*;

/// Fewest reachable exchanges the loop will run with
pub const MIN_EXCHANGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Stopped,
    Initializing,
    Running,
    Stopping,
}

/// Snapshot of the scheduler's own bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    /// Cycles whose body finished, whether or not they found anything
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub exchanges: Vec<ExchangeHandle>,
    pub stats: Option<MonitoringStats>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Stopped,
            cycles_completed: 0,
            cycles_failed: 0,
            last_cycle_at: None,
            last_error: None,
            exchanges: Vec::new(),
            stats: None,
        }
    }
}

/// Owns the polling loop.
///
/// `start` connects the exchanges and spawns the loop as a task; `stop`
/// signals it and waits for the in-flight cycle to finish. Dropping the
/// monitor without stopping it also ends the loop at its next sleep.
pub struct Monitor {
    registry: Arc<ExchangeRegistry>,
    store: Arc<dyn Store>,
    status: Arc<RwLock<MonitorStatus>>,
    runner: Option<RunnerHandle>,
}

struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Monitor {
    pub fn new(registry: Arc<ExchangeRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            registry,
            store,
            status: Arc::new(RwLock::new(MonitorStatus::default())),
            runner: None,
        }
    }

    /// Connect every configured exchange and start polling.
    ///
    /// Fails with [`MonitorError::FatalStartup`] when fewer than
    /// [`MIN_EXCHANGES`] exchanges connected; the monitor is then `Stopped`.
    pub async fn start(&mut self, config: Config) -> Result<()> {
        if self.runner.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        config.validate()?;

        *self.status.write().await = MonitorStatus {
            state: MonitorState::Initializing,
            ..Default::default()
        };
        info!("🚀 Starting arbitrage monitor...");

        let cycle_runner = match self.initialize(config).await {
            Ok(runner) => runner,
            Err(e) => {
                error!("Monitor failed to start: {}", e);
                self.status.write().await.state = MonitorState::Stopped;
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.status.write().await.state = MonitorState::Running;
        let task = tokio::spawn(cycle_runner.run(shutdown_rx));
        self.runner = Some(RunnerHandle { shutdown, task });
        Ok(())
    }

    async fn initialize(&self, config: Config) -> Result<CycleRunner> {
        let pairs = config.trading_pairs()?;
        let pool = ExchangeClientPool::connect(&self.registry, &config).await?;
        let now = Utc::now();

        let stats = {
            let mut session = self.store.session().await?;
            for handle in pool.handles() {
                session.upsert_exchange(&handle).await?;
            }
            load_or_init_stats(session.as_mut(), now).await?
        };

        {
            let mut status = self.status.write().await;
            status.exchanges = pool.handles();
            status.stats = Some(stats);
        }

        let available = pool.connected_count();
        if available < MIN_EXCHANGES {
            return Err(MonitorError::FatalStartup {
                available,
                required: MIN_EXCHANGES,
            });
        }

        info!(
            "✅ Monitoring {} pairs across {} exchanges every {}s",
            pairs.len(),
            available,
            config.monitor.poll_interval_secs
        );

        Ok(CycleRunner {
            pool,
            pairs,
            config,
            store: self.store.clone(),
            status: self.status.clone(),
            last_sweep: Instant::now(),
        })
    }

    /// Signal the loop and wait for it to halt.
    ///
    /// The in-flight cycle, if any, runs to completion first. Stopping a
    /// monitor that is not running does nothing.
    pub async fn stop(&mut self) {
        let Some(runner) = self.runner.take() else {
            return;
        };

        self.status.write().await.state = MonitorState::Stopping;
        info!("🛑 Stopping arbitrage monitor...");

        let _ = runner.shutdown.send(true);
        if let Err(e) = runner.task.await {
            error!("Monitor task ended abnormally: {}", e);
        }

        self.status.write().await.state = MonitorState::Stopped;
        info!("Monitor stopped");
    }

    pub async fn status(&self) -> MonitorStatus {
        self.status.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }
}

/// What one successful cycle produced
struct CycleReport {
    opportunities: usize,
    stats: Option<MonitoringStats>,
}

/// State owned by the spawned loop
struct CycleRunner {
    pool: ExchangeClientPool,
    pairs: Vec<TradingPair>,
    config: Config,
    store: Arc<dyn Store>,
    status: Arc<RwLock<MonitorStatus>>,
    last_sweep: Instant,
}

impl CycleRunner {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = AssertUnwindSafe(self.cycle()).catch_unwind().await;
            let pause = match outcome {
                Ok(Ok(report)) => {
                    self.cycle_succeeded(report).await;
                    self.config.monitor.poll_interval()
                }
                Ok(Err(e)) => {
                    self.cycle_failed(e).await;
                    self.config.monitor.error_cooldown()
                }
                Err(panic) => {
                    let e = MonitorError::CyclePanicked(panic_message(panic));
                    self.cycle_failed(e).await;
                    self.config.monitor.error_cooldown()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One pass: fetch, detect, then persist within a single store session
    async fn cycle(&mut self) -> Result<CycleReport> {
        let fetched = collect_cycle(
            &mut self.pool,
            &self.pairs,
            self.config.monitor.max_fetches_per_exchange,
        )
        .await;

        let now = Utc::now();
        let opportunities = detect(&fetched.by_pair, &self.config.detector, now);

        let store = self.store.clone();
        let mut session = store.session().await?;

        session.append_quotes(&fetched.quotes).await?;
        for handle in self.pool.handles() {
            session.upsert_exchange(&handle).await?;
        }

        let stats = match record_opportunities(session.as_mut(), &opportunities, now).await? {
            Some(stats) => Some(stats),
            None => session.load_stats().await?,
        };

        if self.last_sweep.elapsed() > self.config.retention.sweep_interval() {
            sweep_retention(session.as_mut(), now, &self.config.retention).await?;
            self.last_sweep = Instant::now();
        }

        Ok(CycleReport {
            opportunities: opportunities.len(),
            stats,
        })
    }

    async fn cycle_succeeded(&self, report: CycleReport) {
        let mut status = self.status.write().await;
        status.cycles_completed += 1;
        status.last_cycle_at = Some(Utc::now());
        status.exchanges = self.pool.handles();
        if report.stats.is_some() {
            status.stats = report.stats;
        }
        if report.opportunities == 0 {
            debug!("Cycle {} found no opportunities", status.cycles_completed);
        }
    }

    async fn cycle_failed(&self, e: MonitorError) {
        error!(
            "Error in monitoring cycle: {}. Retrying in {}s",
            e, self.config.monitor.error_cooldown_secs
        );
        let mut status = self.status.write().await;
        status.cycles_failed += 1;
        status.last_cycle_at = Some(Utc::now());
        status.last_error = Some(e.to_string());
        status.exchanges = self.pool.handles();
        if status.exchanges.iter().all(|h| h.status != ExchangeStatus::Active) {
            warn!("No exchange is currently active");
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
