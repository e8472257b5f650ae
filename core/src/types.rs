use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Identifier of an exchange as it appears in configuration (`binance`, `kucoin`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Trading pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,  // e.g. "BTC"
    pub quote: String, // e.g. "USDT"
}

impl TradingPair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
        }
    }

    /// Concatenated symbol used by most REST APIs (BTCUSDT)
    pub fn joined(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote))
                if !base.trim().is_empty() && !quote.trim().is_empty() && !quote.contains('/') =>
            {
                Ok(TradingPair::new(base, quote))
            }
            _ => Err(ConfigError::InvalidValue {
                field: "monitor.pairs",
                reason: format!("'{}' is not a BASE/QUOTE pair", s),
            }),
        }
    }
}

/// Raw ticker fields as returned by an exchange connector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    /// 24h volume in quote currency
    pub quote_volume: Decimal,
}

/// One exchange's price snapshot for a pair, stamped when it was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub exchange: ExchangeId,
    pub pair: TradingPair,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub quote_volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn from_ticker(
        exchange: ExchangeId,
        pair: TradingPair,
        ticker: Ticker,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            pair,
            bid: ticker.bid,
            ask: ticker.ask,
            last: ticker.last,
            quote_volume: ticker.quote_volume.max(Decimal::ZERO),
            timestamp,
        }
    }

    /// Ask price, if the exchange quoted a positive one
    pub fn usable_ask(&self) -> Option<Decimal> {
        self.ask.filter(|p| *p > Decimal::ZERO)
    }

    /// Bid price, if the exchange quoted a positive one
    pub fn usable_bid(&self) -> Option<Decimal> {
        self.bid.filter(|p| *p > Decimal::ZERO)
    }
}

/// Quotes gathered in one cycle: pair -> exchange -> quote.
///
/// Exchanges whose fetch failed are simply absent, so an entry may hold
/// zero, one or many exchanges.
pub type QuoteMap = BTreeMap<TradingPair, BTreeMap<ExchangeId, Quote>>;

/// A cross-exchange price discrepancy above the configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub pair: TradingPair,
    pub buy_exchange: ExchangeId,
    pub sell_exchange: ExchangeId,
    pub buy_price: Decimal,       // Ask on buy exchange
    pub sell_price: Decimal,      // Bid on sell exchange
    pub profit_pct: Decimal,      // Gross spread as percentage of buy price
    pub net_profit_pct: Decimal,  // After the configured round-trip fee
    pub volume: Decimal,          // Smaller of the two quote volumes
    pub trade_size: Decimal,      // Notional used for the profit estimate
    pub potential_profit: Decimal, // Estimated profit in quote currency
    pub detected_at: DateTime<Utc>,
}

/// Connectivity of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Active,
    Inactive,
    Error,
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeStatus::Active => write!(f, "active"),
            ExchangeStatus::Inactive => write!(f, "inactive"),
            ExchangeStatus::Error => write!(f, "error"),
        }
    }
}

/// Last known state of one configured exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeHandle {
    pub id: ExchangeId,
    pub status: ExchangeStatus,
    pub last_checked: DateTime<Utc>,
}

impl ExchangeHandle {
    pub fn new(id: ExchangeId, status: ExchangeStatus, at: DateTime<Utc>) -> Self {
        Self {
            id,
            status,
            last_checked: at,
        }
    }

    pub fn mark(&mut self, status: ExchangeStatus, at: DateTime<Utc>) {
        self.status = status;
        self.last_checked = at;
    }
}

/// Running aggregates over every opportunity recorded so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub total_opportunities: u64,
    /// Sum of the gross profit percentages of all recorded opportunities
    pub total_profit_pct: Decimal,
    pub best_opportunity_pct: Option<Decimal>,
    /// Cycles that recorded at least one opportunity
    pub monitoring_cycles: u64,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl MonitoringStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_opportunities: 0,
            total_profit_pct: Decimal::ZERO,
            best_opportunity_pct: None,
            monitoring_cycles: 0,
            start_time: now,
            last_update: now,
        }
    }

    /// Fold one cycle's opportunities into the aggregates.
    ///
    /// An empty batch leaves the stats untouched.
    pub fn record_batch(&mut self, batch: &[ArbitrageOpportunity], now: DateTime<Utc>) {
        if batch.is_empty() {
            return;
        }

        self.total_opportunities += batch.len() as u64;
        self.total_profit_pct += batch.iter().map(|o| o.profit_pct).sum::<Decimal>();
        self.monitoring_cycles += 1;
        self.last_update = now;

        let batch_best = batch.iter().map(|o| o.profit_pct).max();
        self.best_opportunity_pct = match (self.best_opportunity_pct, batch_best) {
            (Some(best), Some(candidate)) => Some(best.max(candidate)),
            (best, candidate) => best.or(candidate),
        };
    }

    pub fn average_profit_pct(&self) -> Decimal {
        if self.total_opportunities == 0 {
            return Decimal::ZERO;
        }
        self.total_profit_pct / Decimal::from(self.total_opportunities)
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).max(Duration::zero())
    }

    /// Opportunities per hour of uptime, counting at least one hour
    pub fn opportunities_per_hour(&self, now: DateTime<Utc>) -> Decimal {
        let hours = Decimal::from(self.uptime(now).num_seconds()) / Decimal::from(3600);
        Decimal::from(self.total_opportunities) / hours.max(Decimal::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::quote;
    use rust_decimal_macros::dec;

    fn opportunity(profit_pct: Decimal) -> ArbitrageOpportunity {
        let buy = quote("x", "BTC/USDT", dec!(100), dec!(100.5), dec!(0));
        ArbitrageOpportunity {
            pair: buy.pair.clone(),
            buy_exchange: ExchangeId::new("x"),
            sell_exchange: ExchangeId::new("y"),
            buy_price: dec!(100.5),
            sell_price: dec!(101),
            profit_pct,
            net_profit_pct: profit_pct,
            volume: Decimal::ZERO,
            trade_size: Decimal::ZERO,
            potential_profit: Decimal::ZERO,
            detected_at: buy.timestamp,
        }
    }

    #[test]
    fn trading_pair_parses_and_normalizes() {
        let pair: TradingPair = " btc/usdt".parse().unwrap();
        assert_eq!(pair, TradingPair::new("BTC", "USDT"));
        assert_eq!(pair.to_string(), "BTC/USDT");
        assert_eq!(pair.joined(), "BTCUSDT");
    }

    #[test]
    fn trading_pair_rejects_malformed_symbols() {
        for bad in ["BTCUSDT", "BTC/", "/USDT", "BTC/USDT/EUR", ""] {
            assert!(bad.parse::<TradingPair>().is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn exchange_ids_are_case_insensitive() {
        assert_eq!(ExchangeId::new(" Binance "), ExchangeId::from("binance"));
    }

    #[test]
    fn usable_prices_ignore_zero_and_missing() {
        let mut q = quote("x", "BTC/USDT", dec!(0), dec!(100), dec!(0));
        assert_eq!(q.usable_bid(), None);
        assert_eq!(q.usable_ask(), Some(dec!(100)));
        q.ask = None;
        assert_eq!(q.usable_ask(), None);
    }

    #[test]
    fn record_batch_accumulates_counts_and_best() {
        let start = Utc::now();
        let mut stats = MonitoringStats::new(start);

        stats.record_batch(&[opportunity(dec!(0.4)), opportunity(dec!(0.6))], start);

        assert_eq!(stats.total_opportunities, 2);
        assert_eq!(stats.total_profit_pct, dec!(1.0));
        assert_eq!(stats.best_opportunity_pct, Some(dec!(0.6)));
        assert_eq!(stats.monitoring_cycles, 1);
        assert_eq!(stats.average_profit_pct(), dec!(0.5));
    }

    #[test]
    fn best_profit_is_never_lowered() {
        let now = Utc::now();
        let mut stats = MonitoringStats::new(now);
        stats.record_batch(&[opportunity(dec!(0.9))], now);
        stats.record_batch(&[opportunity(dec!(0.2))], now);

        assert_eq!(stats.best_opportunity_pct, Some(dec!(0.9)));
        assert_eq!(stats.monitoring_cycles, 2);
    }

    #[test]
    fn empty_batch_does_not_mutate() {
        let now = Utc::now();
        let mut stats = MonitoringStats::new(now);
        let before = stats.clone();
        stats.record_batch(&[], now + Duration::seconds(30));
        assert_eq!(stats, before);
    }

    #[test]
    fn opportunities_per_hour_uses_at_least_one_hour() {
        let start = Utc::now();
        let mut stats = MonitoringStats::new(start);
        stats.record_batch(&vec![opportunity(dec!(0.1)); 6], start);

        assert_eq!(stats.opportunities_per_hour(start + Duration::minutes(10)), dec!(6));
        assert_eq!(stats.opportunities_per_hour(start + Duration::hours(3)), dec!(2));
    }
}
