use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::types::{ExchangeId, TradingPair};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub detector: DetectorConfig,
    pub retention: RetentionConfig,
    /// Optional per-exchange overrides, keyed by exchange identifier
    pub exchanges: HashMap<String, ExchangeConfig>,
}

/// Polling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub exchanges: Vec<String>,
    pub pairs: Vec<String>,
    pub poll_interval_secs: u64,
    /// Pause after a failed cycle before the next attempt
    pub error_cooldown_secs: u64,
    pub fetch_timeout_ms: u64,
    /// In-flight quote fetches allowed per exchange; 0 means every pair at once
    pub max_fetches_per_exchange: usize,
}

/// Opportunity detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Opportunities must strictly exceed this net profit percentage
    pub min_profit_pct: Decimal,
    /// Fee percentage subtracted from the gross spread before the threshold check
    pub round_trip_fee_pct: Decimal,
    /// Share of the combined quote volume assumed tradable, in percent
    pub volume_participation_pct: Decimal,
    /// Cap on the notional used for the potential profit estimate
    pub max_trade_size: Decimal,
}

/// History retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub price_days: u32,
    pub opportunity_days: u32,
    pub sweep_interval_secs: u64,
}

/// Per-exchange settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub enabled: bool,
    /// Minimum spacing between two requests to this exchange
    pub rate_limit_ms: u64,
    /// Overrides the connector's public REST endpoint
    pub base_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            exchanges: ["binance", "kucoin", "bybit", "bitget"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pairs: ["BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "XRP/USDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            poll_interval_secs: 30,
            error_cooldown_secs: 30,
            fetch_timeout_ms: 10_000,
            max_fetches_per_exchange: 0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_profit_pct: dec!(0.05),
            round_trip_fee_pct: Decimal::ZERO,
            volume_participation_pct: dec!(0.5),
            max_trade_size: dec!(1000),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            price_days: 7,
            opportunity_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit_ms: 100,
            base_url: None,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl RetentionConfig {
    pub fn price_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.price_days))
    }

    pub fn opportunity_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.opportunity_days))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing or unreadable as TOML.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => config,
            Err(ConfigError::ReadFile(_)) => {
                tracing::info!("No config file found at {}. Using defaults.", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::Parse)
    }

    /// Settings for one exchange; absent entries get the defaults
    pub fn exchange(&self, id: &ExchangeId) -> ExchangeConfig {
        self.exchanges
            .iter()
            .find(|(name, _)| ExchangeId::new(name.as_str()) == *id)
            .map(|(_, cfg)| cfg.clone())
            .unwrap_or_default()
    }

    /// Configured exchanges that are not disabled, deduplicated in order
    pub fn enabled_exchanges(&self) -> Vec<ExchangeId> {
        let mut ids: Vec<ExchangeId> = Vec::new();
        for name in &self.monitor.exchanges {
            let id = ExchangeId::new(name);
            if !ids.contains(&id) && self.exchange(&id).enabled {
                ids.push(id);
            }
        }
        ids
    }

    pub fn trading_pairs(&self) -> Result<Vec<TradingPair>, ConfigError> {
        let mut pairs: Vec<TradingPair> = Vec::new();
        for raw in &self.monitor.pairs {
            let pair: TradingPair = raw.parse()?;
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        Ok(pairs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_exchanges().is_empty() {
            return Err(invalid("monitor.exchanges", "no enabled exchanges configured"));
        }
        if self.trading_pairs()?.is_empty() {
            return Err(invalid("monitor.pairs", "no trading pairs configured"));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(invalid("monitor.poll_interval_secs", "must be greater than zero"));
        }
        if self.monitor.fetch_timeout_ms == 0 {
            return Err(invalid("monitor.fetch_timeout_ms", "must be greater than zero"));
        }
        if self.retention.price_days == 0 {
            return Err(invalid("retention.price_days", "must be greater than zero"));
        }
        if self.retention.opportunity_days == 0 {
            return Err(invalid("retention.opportunity_days", "must be greater than zero"));
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(invalid("retention.sweep_interval_secs", "must be greater than zero"));
        }

        let detector = &self.detector;
        if detector.min_profit_pct < Decimal::ZERO {
            return Err(invalid("detector.min_profit_pct", "must not be negative"));
        }
        if detector.round_trip_fee_pct < Decimal::ZERO {
            return Err(invalid("detector.round_trip_fee_pct", "must not be negative"));
        }
        if detector.max_trade_size < Decimal::ZERO {
            return Err(invalid("detector.max_trade_size", "must not be negative"));
        }
        if detector.volume_participation_pct <= Decimal::ZERO
            || detector.volume_participation_pct > dec!(100)
        {
            return Err(invalid(
                "detector.volume_participation_pct",
                "must be in (0, 100]",
            ));
        }

        for (name, cfg) in &self.exchanges {
            if let Some(base_url) = &cfg.base_url {
                url::Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
                    field: "exchanges.base_url",
                    reason: format!("{}: {}", name, e),
                })?;
            }
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
