use async_trait::async_trait;
use serde_json::Value;

use crate::config::ExchangeConfig;
use crate::exchange::{
    base_url, get_json, price_field, volume_field, ExchangeConnector, ExchangeError,
};
use crate::types::*;

const BYBIT_REST_URL: &str = "https://api.bybit.com";

pub struct BybitConnector {
    base_url: String,
    client: reqwest::Client,
}

impl BybitConnector {
    pub fn new(config: &ExchangeConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url(config, BYBIT_REST_URL),
            client,
        }
    }

    /// Unwrap the V5 envelope: `{"retCode": 0, "retMsg": "OK", "result": {...}}`
    fn result(data: &Value) -> Result<&Value, ExchangeError> {
        match data["retCode"].as_i64() {
            Some(0) => Ok(&data["result"]),
            _ => Err(ExchangeError::Api(
                data["retMsg"].as_str().unwrap_or("Unknown error").to_string(),
            )),
        }
    }

    fn parse_ticker(data: &Value, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let item = &Self::result(data)?["list"][0];
        if item.is_null() {
            return Err(ExchangeError::InvalidPair(pair.to_string()));
        }

        Ok(Ticker {
            bid: price_field(&item["bid1Price"]),
            ask: price_field(&item["ask1Price"]),
            last: price_field(&item["lastPrice"]),
            // turnover24h is quoted in the quote coin, volume24h in the base coin
            quote_volume: volume_field(&item["turnover24h"]),
        })
    }

    fn parse_markets(data: &Value) -> Result<Vec<TradingPair>, ExchangeError> {
        let list = Self::result(data)?["list"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing instrument list".to_string()))?;

        Ok(list
            .iter()
            .filter(|i| i["status"].as_str().map_or(true, |s| s == "Trading"))
            .filter_map(|i| {
                Some(TradingPair::new(
                    i["baseCoin"].as_str()?,
                    i["quoteCoin"].as_str()?,
                ))
            })
            .collect())
    }
}

#[async_trait]
impl ExchangeConnector for BybitConnector {
    fn id(&self) -> ExchangeId {
        ExchangeId::new("bybit")
    }

    async fn load_markets(&self) -> Result<Vec<TradingPair>, ExchangeError> {
        let url = format!("{}/v5/market/instruments-info?category=spot", self.base_url);
        let data = get_json(&self.client, &url).await?;
        Self::parse_markets(&data)
    }

    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let url = format!(
            "{}/v5/market/tickers?category=spot&symbol={}",
            self.base_url,
            pair.joined()
        );
        let data = get_json(&self.client, &url).await?;
        Self::parse_ticker(&data, pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_v5_spot_ticker() {
        let body = json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "spot",
                "list": [{
                    "symbol": "BTCUSDT",
                    "bid1Price": "67010.5",
                    "bid1Size": "0.4",
                    "ask1Price": "67010.6",
                    "ask1Size": "1.2",
                    "lastPrice": "67010.55",
                    "volume24h": "12000.5",
                    "turnover24h": "804126600.12"
                }]
            }
        });

        let ticker =
            BybitConnector::parse_ticker(&body, &TradingPair::new("BTC", "USDT")).unwrap();
        assert_eq!(ticker.bid, Some(dec!(67010.5)));
        assert_eq!(ticker.ask, Some(dec!(67010.6)));
        assert_eq!(ticker.last, Some(dec!(67010.55)));
        assert_eq!(ticker.quote_volume, dec!(804126600.12));
    }

    #[test]
    fn empty_bid_is_absent() {
        let body = json!({
            "retCode": 0,
            "result": {"list": [{"bid1Price": "", "ask1Price": "1.5", "lastPrice": "1.4"}]}
        });

        let ticker =
            BybitConnector::parse_ticker(&body, &TradingPair::new("XRP", "USDT")).unwrap();
        assert_eq!(ticker.bid, None);
        assert_eq!(ticker.quote_volume, Decimal::ZERO);
    }

    #[test]
    fn error_envelope_is_api_error() {
        let body = json!({"retCode": 10001, "retMsg": "Not supported symbols", "result": {}});
        let err =
            BybitConnector::parse_ticker(&body, &TradingPair::new("FOO", "USDT")).unwrap_err();
        assert!(matches!(err, ExchangeError::Api(msg) if msg == "Not supported symbols"));

        let body = json!({"retCode": 0, "result": {"list": []}});
        let err =
            BybitConnector::parse_ticker(&body, &TradingPair::new("FOO", "USDT")).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidPair(_)));
    }

    #[test]
    fn parses_trading_instruments_only() {
        let body = json!({
            "retCode": 0,
            "result": {"list": [
                {"symbol": "BTCUSDT", "baseCoin": "BTC", "quoteCoin": "USDT", "status": "Trading"},
                {"symbol": "OLDUSDT", "baseCoin": "OLD", "quoteCoin": "USDT", "status": "Closed"}
            ]}
        });

        let markets = BybitConnector::parse_markets(&body).unwrap();
        assert_eq!(markets, vec![TradingPair::new("BTC", "USDT")]);
    }
}
