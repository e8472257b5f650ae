use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ExchangeConfig;
use crate::types::{ExchangeId, Ticker, TradingPair};

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod kucoin;
pub mod pool;

pub use pool::ExchangeClientPool;

/// Core trait that all exchange connectors must implement
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Which exchange this connector represents
    fn id(&self) -> ExchangeId;

    /// Fetch the exchange's market list once at startup.
    ///
    /// Returns the spot pairs the exchange currently lists.
    async fn load_markets(&self) -> Result<Vec<TradingPair>, ExchangeError>;

    /// Get the current best bid/ask, last price and quote volume for a pair
    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError>;
}

/// Exchange-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Invalid pair: {0}")]
    InvalidPair(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("No connector registered for exchange '{0}'")]
    UnknownExchange(String),
}

type Constructor =
    Arc<dyn Fn(&ExchangeConfig, reqwest::Client) -> Arc<dyn ExchangeConnector> + Send + Sync>;

/// Maps exchange identifiers to the constructor of their connector
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    constructors: BTreeMap<ExchangeId, Constructor>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every connector shipped in this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("binance", |cfg, client| -> Arc<dyn ExchangeConnector> {
            Arc::new(binance::BinanceConnector::new(cfg, client))
        });
        registry.register("bybit", |cfg, client| -> Arc<dyn ExchangeConnector> {
            Arc::new(bybit::BybitConnector::new(cfg, client))
        });
        registry.register("bitget", |cfg, client| -> Arc<dyn ExchangeConnector> {
            Arc::new(bitget::BitgetConnector::new(cfg, client))
        });
        registry.register("kucoin", |cfg, client| -> Arc<dyn ExchangeConnector> {
            Arc::new(kucoin::KucoinConnector::new(cfg, client))
        });
        registry
    }

    pub fn register<F>(&mut self, id: impl Into<ExchangeId>, constructor: F)
    where
        F: Fn(&ExchangeConfig, reqwest::Client) -> Arc<dyn ExchangeConnector>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(id.into(), Arc::new(constructor));
    }

    pub fn contains(&self, id: &ExchangeId) -> bool {
        self.constructors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ExchangeId> {
        self.constructors.keys()
    }

    pub fn create(
        &self,
        id: &ExchangeId,
        config: &ExchangeConfig,
        client: reqwest::Client,
    ) -> Result<Arc<dyn ExchangeConnector>, ExchangeError> {
        self.constructors
            .get(id)
            .map(|constructor| constructor(config, client))
            .ok_or_else(|| ExchangeError::UnknownExchange(id.to_string()))
    }
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

/// GET a JSON body, mapping transport and HTTP failures to [`ExchangeError`]
pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<serde_json::Value, ExchangeError> {
    let resp = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExchangeError::Connection(format!("timeout: {}", e))
        } else {
            ExchangeError::Connection(e.to_string())
        }
    })?;

    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ExchangeError::RateLimit);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ExchangeError::Api(format!(
            "HTTP {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    resp.json()
        .await
        .map_err(|e| ExchangeError::Parse(e.to_string()))
}

/// Read a price field that exchanges send either as a string or a number.
///
/// Empty, unparsable and non-positive values are treated as absent.
pub(crate) fn price_field(value: &serde_json::Value) -> Option<Decimal> {
    decimal_field(value).filter(|p| *p > Decimal::ZERO)
}

/// Read a volume field; absent or unparsable volume counts as zero
pub(crate) fn volume_field(value: &serde_json::Value) -> Decimal {
    decimal_field(value)
        .filter(|v| *v > Decimal::ZERO)
        .unwrap_or(Decimal::ZERO)
}

fn decimal_field(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Base URL for a connector, honouring a configured override
pub(crate) fn base_url(config: &ExchangeConfig, default: &str) -> String {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn price_field_accepts_strings_and_numbers() {
        assert_eq!(price_field(&json!("101.25")), Some(dec!(101.25)));
        assert_eq!(price_field(&json!(99.5)), Some(dec!(99.5)));
        assert_eq!(price_field(&json!("0")), None);
        assert_eq!(price_field(&json!("")), None);
        assert_eq!(price_field(&json!(null)), None);
        assert_eq!(price_field(&json!("-1")), None);
    }

    #[test]
    fn volume_field_defaults_to_zero() {
        assert_eq!(volume_field(&json!("1234.5")), dec!(1234.5));
        assert_eq!(volume_field(&json!(null)), Decimal::ZERO);
        assert_eq!(volume_field(&json!("abc")), Decimal::ZERO);
    }

    #[test]
    fn base_url_prefers_override() {
        let mut cfg = ExchangeConfig::default();
        assert_eq!(base_url(&cfg, "https://api.example.com"), "https://api.example.com");
        cfg.base_url = Some("http://127.0.0.1:9000/".to_string());
        assert_eq!(base_url(&cfg, "https://api.example.com"), "http://127.0.0.1:9000");
    }

    #[test]
    fn default_registry_knows_bundled_connectors() {
        let registry = ExchangeRegistry::with_defaults();
        let ids: Vec<&str> = registry.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["binance", "bitget", "bybit", "kucoin"]);

        let client = reqwest::Client::new();
        let connector = registry
            .create(&ExchangeId::new("KuCoin"), &ExchangeConfig::default(), client.clone())
            .unwrap();
        assert_eq!(connector.id(), ExchangeId::new("kucoin"));

        let err = registry
            .create(&ExchangeId::new("kraken"), &ExchangeConfig::default(), client)
            .err()
            .unwrap();
        assert!(matches!(err, ExchangeError::UnknownExchange(name) if name == "kraken"));
    }
}
