//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::exchange::{ExchangeConnector, ExchangeError, ExchangeRegistry};
use crate::store::{MemoryStore, Store, StoreError, StoreSession};
use crate::types::*;

/// Exchange connector answering from a scripted ticker table
#[derive(Clone)]
pub struct ScriptedConnector {
    id: ExchangeId,
    tickers: Arc<Mutex<HashMap<TradingPair, Ticker>>>,
    markets: Vec<TradingPair>,
    connect_fails: bool,
    fetch_fails: Arc<AtomicBool>,
    fetch_panics: Arc<AtomicBool>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(id: &str) -> Self {
        Self {
            id: ExchangeId::new(id),
            tickers: Arc::new(Mutex::new(HashMap::new())),
            markets: Vec::new(),
            connect_fails: false,
            fetch_fails: Arc::new(AtomicBool::new(false)),
            fetch_panics: Arc::new(AtomicBool::new(false)),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_ticker(self, pair: &TradingPair, bid: Decimal, ask: Decimal) -> Self {
        self.set_ticker(
            pair,
            Ticker {
                bid: Some(bid),
                ask: Some(ask),
                last: Some(bid),
                quote_volume: Decimal::from(1_000_000),
            },
        );
        self
    }

    /// Restrict the markets reported by `load_markets`
    pub fn with_markets(mut self, markets: Vec<TradingPair>) -> Self {
        self.markets = markets;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    /// Replace the ticker served for a pair; visible to every clone
    pub fn set_ticker(&self, pair: &TradingPair, ticker: Ticker) {
        if let Ok(mut tickers) = self.tickers.lock() {
            tickers.insert(pair.clone(), ticker);
        }
    }

    /// Switch that makes every fetch fail while set
    pub fn fetch_switch(&self) -> Arc<AtomicBool> {
        self.fetch_fails.clone()
    }

    /// Switch that makes every fetch panic while set
    pub fn panic_switch(&self) -> Arc<AtomicBool> {
        self.fetch_panics.clone()
    }

    /// Counter of `fetch_ticker` calls
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl ExchangeConnector for ScriptedConnector {
    fn id(&self) -> ExchangeId {
        self.id.clone()
    }

    async fn load_markets(&self) -> Result<Vec<TradingPair>, ExchangeError> {
        if self.connect_fails {
            return Err(ExchangeError::Connection(format!("{} unreachable", self.id)));
        }
        Ok(self.markets.clone())
    }

    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fetch_panics.load(Ordering::SeqCst) {
            panic!("{} connector blew up", self.id);
        }
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api(format!("{} is down", self.id)));
        }
        self.tickers
            .lock()
            .ok()
            .and_then(|tickers| tickers.get(pair).cloned())
            .ok_or_else(|| ExchangeError::InvalidPair(pair.to_string()))
    }
}

/// Registry serving the given scripted connectors under their own ids
pub fn registry_with(connectors: Vec<ScriptedConnector>) -> ExchangeRegistry {
    let mut registry = ExchangeRegistry::new();
    for connector in connectors {
        let id = connector.id.clone();
        registry.register(id, move |_, _| -> Arc<dyn ExchangeConnector> {
            Arc::new(connector.clone())
        });
    }
    registry
}

/// Build a quote observed now
pub fn quote(
    exchange: &str,
    pair: &str,
    bid: Decimal,
    ask: Decimal,
    quote_volume: Decimal,
) -> Quote {
    let pair: TradingPair = pair.parse().unwrap_or_else(|_| TradingPair::new(pair, "USDT"));
    Quote {
        exchange: ExchangeId::new(exchange),
        pair,
        bid: Some(bid),
        ask: Some(ask),
        last: Some(bid),
        quote_volume,
        timestamp: Utc::now(),
    }
}

/// Group quotes into the per-pair map the detector consumes
pub fn quote_map(quotes: Vec<Quote>) -> QuoteMap {
    let mut map = QuoteMap::new();
    for q in quotes {
        map.entry(q.pair.clone()).or_default().insert(q.exchange.clone(), q);
    }
    map
}

/// Memory store whose sessions can be made to fail on demand
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` session acquisitions
    pub fn fail_next_sessions(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn session<'a>(&'a self) -> Result<Box<dyn StoreSession + 'a>, StoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("scripted outage".to_string()));
        }
        self.inner.session().await
    }
}
