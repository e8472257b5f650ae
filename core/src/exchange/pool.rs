use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, ExchangeConfig};
use crate::exchange::{ExchangeConnector, ExchangeError, ExchangeRegistry};
use crate::types::*;

/// One long-lived connection per configured exchange.
///
/// Exchanges that failed to connect keep an `inactive` handle and are never
/// queried; the rest are queried every cycle and flip between `active` and
/// `error` depending on their last fetch.
pub struct ExchangeClientPool {
    clients: Vec<PooledExchange>,
    fetch_timeout: Duration,
}

struct PooledExchange {
    handle: ExchangeHandle,
    connector: Option<Arc<dyn ExchangeConnector>>,
    /// Pairs listed by the exchange; empty when it reported none
    markets: HashSet<TradingPair>,
    throttle: Throttle,
}

/// Minimum spacing between consecutive requests to one exchange
struct Throttle {
    spacing: Duration,
    next_slot: Mutex<Instant>,
}

impl Throttle {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    async fn wait(&self) {
        if self.spacing.is_zero() {
            return;
        }
        let mut next = self.next_slot.lock().await;
        tokio::time::sleep_until(*next).await;
        *next = Instant::now() + self.spacing;
    }
}

impl ExchangeClientPool {
    /// Connect to every enabled exchange in the configuration.
    ///
    /// A failed connection only marks that exchange `inactive`; it is up to
    /// the caller to decide whether enough exchanges survived.
    pub async fn connect(
        registry: &ExchangeRegistry,
        config: &Config,
    ) -> Result<Self, ExchangeError> {
        let fetch_timeout = config.monitor.fetch_timeout();
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .user_agent(concat!("observatory/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExchangeError::Connection(e.to_string()))?;

        let pairs = config.trading_pairs().unwrap_or_default();
        let attempts = config.enabled_exchanges().into_iter().map(|id| {
            let exchange_config = config.exchange(&id);
            let client = client.clone();
            let pairs = &pairs;
            async move {
                let result =
                    connect_exchange(registry, &id, &exchange_config, client, fetch_timeout).await;
                PooledExchange::from_attempt(id, &exchange_config, result, pairs)
            }
        });

        let clients = join_all(attempts).await;
        let pool = Self {
            clients,
            fetch_timeout,
        };
        info!(
            "🔥 {} of {} exchanges ready!",
            pool.connected_count(),
            pool.clients.len()
        );
        Ok(pool)
    }

    /// Snapshot of every exchange handle, connected or not
    pub fn handles(&self) -> Vec<ExchangeHandle> {
        self.clients.iter().map(|c| c.handle.clone()).collect()
    }

    /// Identifiers of exchanges that connected successfully at startup
    pub fn connected_ids(&self) -> Vec<ExchangeId> {
        self.clients
            .iter()
            .filter(|c| c.connector.is_some())
            .map(|c| c.handle.id.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.clients.iter().filter(|c| c.connector.is_some()).count()
    }

    /// Whether an exchange lists the pair (unknown market lists allow everything)
    pub fn lists(&self, exchange: &ExchangeId, pair: &TradingPair) -> bool {
        self.client(exchange)
            .map(|c| c.markets.is_empty() || c.markets.contains(pair))
            .unwrap_or(false)
    }

    /// Fetch one quote, bounded by the per-fetch timeout.
    ///
    /// Only reads pool state, so calls for different exchanges and pairs can
    /// run concurrently; the outcome is applied afterwards through
    /// [`record_success`](Self::record_success) / [`record_failure`](Self::record_failure).
    pub async fn fetch_quote(
        &self,
        exchange: &ExchangeId,
        pair: &TradingPair,
    ) -> Result<Quote, ExchangeError> {
        let client = self
            .client(exchange)
            .ok_or_else(|| ExchangeError::UnknownExchange(exchange.to_string()))?;
        let connector = client
            .connector
            .as_ref()
            .ok_or_else(|| ExchangeError::Connection(format!("{} is not connected", exchange)))?;
        if !client.markets.is_empty() && !client.markets.contains(pair) {
            return Err(ExchangeError::InvalidPair(format!("{} on {}", pair, exchange)));
        }

        client.throttle.wait().await;

        let ticker = tokio::time::timeout(self.fetch_timeout, connector.fetch_ticker(pair))
            .await
            .map_err(|_| ExchangeError::Timeout(self.fetch_timeout.as_millis() as u64))??;

        Ok(Quote::from_ticker(exchange.clone(), pair.clone(), ticker, Utc::now()))
    }

    pub fn record_success(&mut self, exchange: &ExchangeId, at: DateTime<Utc>) {
        self.mark(exchange, ExchangeStatus::Active, at);
    }

    pub fn record_failure(&mut self, exchange: &ExchangeId, at: DateTime<Utc>) {
        self.mark(exchange, ExchangeStatus::Error, at);
    }

    fn mark(&mut self, exchange: &ExchangeId, status: ExchangeStatus, at: DateTime<Utc>) {
        if let Some(client) = self
            .clients
            .iter_mut()
            .find(|c| c.handle.id == *exchange && c.connector.is_some())
        {
            client.handle.mark(status, at);
        }
    }

    fn client(&self, exchange: &ExchangeId) -> Option<&PooledExchange> {
        self.clients.iter().find(|c| c.handle.id == *exchange)
    }
}

impl PooledExchange {
    fn from_attempt(
        id: ExchangeId,
        config: &ExchangeConfig,
        attempt: Result<(Arc<dyn ExchangeConnector>, Vec<TradingPair>), ExchangeError>,
        pairs: &[TradingPair],
    ) -> Self {
        let now = Utc::now();
        let throttle = Throttle::new(Duration::from_millis(config.rate_limit_ms));

        match attempt {
            Ok((connector, markets)) => {
                let markets: HashSet<TradingPair> = markets.into_iter().collect();
                let unlisted: Vec<String> = pairs
                    .iter()
                    .filter(|p| !markets.is_empty() && !markets.contains(*p))
                    .map(|p| p.to_string())
                    .collect();
                if !unlisted.is_empty() {
                    warn!("{} does not list {:?}; skipping those pairs there", id, unlisted);
                }
                info!("✅ {} connected ({} markets)", id, markets.len());

                Self {
                    handle: ExchangeHandle::new(id, ExchangeStatus::Active, now),
                    connector: Some(connector),
                    markets,
                    throttle,
                }
            }
            Err(e) => {
                warn!("❌ {} failed: {}", id, e);
                Self {
                    handle: ExchangeHandle::new(id, ExchangeStatus::Inactive, now),
                    connector: None,
                    markets: HashSet::new(),
                    throttle,
                }
            }
        }
    }
}

/// Build the connector and load its markets once
async fn connect_exchange(
    registry: &ExchangeRegistry,
    id: &ExchangeId,
    config: &ExchangeConfig,
    client: reqwest::Client,
    timeout: Duration,
) -> Result<(Arc<dyn ExchangeConnector>, Vec<TradingPair>), ExchangeError> {
    let connector = registry.create(id, config, client)?;
    debug!("Loading markets for {}", id);
    let markets = tokio::time::timeout(timeout, connector.load_markets())
        .await
        .map_err(|_| ExchangeError::Timeout(timeout.as_millis() as u64))??;
    Ok((connector, markets))
}
