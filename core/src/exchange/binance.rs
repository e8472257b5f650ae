use async_trait::async_trait;
use serde_json::Value;

use crate::config::ExchangeConfig;
use crate::exchange::{
    base_url, get_json, price_field, volume_field, ExchangeConnector, ExchangeError,
};
use crate::types::*;

const BINANCE_REST_URL: &str = "https://api.binance.com";

pub struct BinanceConnector {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceConnector {
    pub fn new(config: &ExchangeConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url(config, BINANCE_REST_URL),
            client,
        }
    }

    fn parse_ticker(body: &Value) -> Result<Ticker, ExchangeError> {
        // Binance errors come back as {"code": -1121, "msg": "Invalid symbol."}
        if let Some(code) = body["code"].as_i64() {
            return Err(ExchangeError::Api(format!(
                "{}: {}",
                code,
                body["msg"].as_str().unwrap_or("Unknown error")
            )));
        }

        Ok(Ticker {
            bid: price_field(&body["bidPrice"]),
            ask: price_field(&body["askPrice"]),
            last: price_field(&body["lastPrice"]),
            quote_volume: volume_field(&body["quoteVolume"]),
        })
    }

    fn parse_markets(body: &Value) -> Result<Vec<TradingPair>, ExchangeError> {
        let symbols = body["symbols"]
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing symbols in exchangeInfo".to_string()))?;

        Ok(symbols
            .iter()
            .filter(|s| s["status"].as_str() == Some("TRADING"))
            .filter_map(|s| {
                Some(TradingPair::new(
                    s["baseAsset"].as_str()?,
                    s["quoteAsset"].as_str()?,
                ))
            })
            .collect())
    }
}

#[async_trait]
impl ExchangeConnector for BinanceConnector {
    fn id(&self) -> ExchangeId {
        ExchangeId::new("binance")
    }

    async fn load_markets(&self) -> Result<Vec<TradingPair>, ExchangeError> {
        let url = format!("{}/api/v3/exchangeInfo?permissions=SPOT", self.base_url);
        let body = get_json(&self.client, &url).await?;
        Self::parse_markets(&body)
    }

    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, pair.joined());
        let body = get_json(&self.client, &url).await?;
        Self::parse_ticker(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_24hr_ticker() {
        let body = json!({
            "symbol": "SOLUSDT",
            "lastPrice": "145.21000000",
            "bidPrice": "145.20000000",
            "bidQty": "51.3",
            "askPrice": "145.21000000",
            "askQty": "12.0",
            "volume": "2000000.1",
            "quoteVolume": "290420014.52"
        });

        let ticker = BinanceConnector::parse_ticker(&body).unwrap();
        assert_eq!(ticker.bid, Some(dec!(145.2)));
        assert_eq!(ticker.ask, Some(dec!(145.21)));
        assert_eq!(ticker.last, Some(dec!(145.21)));
        assert_eq!(ticker.quote_volume, dec!(290420014.52));
    }

    #[test]
    fn error_body_is_api_error() {
        let body = json!({"code": -1121, "msg": "Invalid symbol."});
        let err = BinanceConnector::parse_ticker(&body).unwrap_err();
        assert!(matches!(err, ExchangeError::Api(msg) if msg.contains("Invalid symbol")));
    }

    #[test]
    fn parses_exchange_info() {
        let body = json!({
            "timezone": "UTC",
            "symbols": [
                {
                    "symbol": "BNBUSDT",
                    "status": "TRADING",
                    "baseAsset": "BNB",
                    "quoteAsset": "USDT"
                },
                {"symbol": "LUNAUSDT", "status": "BREAK", "baseAsset": "LUNA", "quoteAsset": "USDT"}
            ]
        });

        assert_eq!(
            BinanceConnector::parse_markets(&body).unwrap(),
            vec![TradingPair::new("BNB", "USDT")]
        );
        assert!(BinanceConnector::parse_markets(&json!({})).is_err());
    }
}
