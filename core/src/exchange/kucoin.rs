use async_trait::async_trait;
use serde_json::Value;

use crate::config::ExchangeConfig;
use crate::exchange::{
    base_url, get_json, price_field, volume_field, ExchangeConnector, ExchangeError,
};
use crate::types::*;

const KUCOIN_REST_URL: &str = "https://api.kucoin.com";

const KUCOIN_OK: &str = "200000";

pub struct KucoinConnector {
    base_url: String,
    client: reqwest::Client,
}

impl KucoinConnector {
    pub fn new(config: &ExchangeConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url(config, KUCOIN_REST_URL),
            client,
        }
    }

    /// KuCoin symbols are dash separated (BTC-USDT)
    fn symbol(pair: &TradingPair) -> String {
        format!("{}-{}", pair.base, pair.quote)
    }

    fn data(body: &Value) -> Result<&Value, ExchangeError> {
        if body["code"].as_str() == Some(KUCOIN_OK) {
            Ok(&body["data"])
        } else {
            Err(ExchangeError::Api(
                body["msg"].as_str().unwrap_or("Unknown error").to_string(),
            ))
        }
    }

    fn parse_ticker(body: &Value, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let stats = Self::data(body)?;
        if stats.is_null() {
            return Err(ExchangeError::InvalidPair(pair.to_string()));
        }

        // "buy" is the best bid and "sell" the best ask
        Ok(Ticker {
            bid: price_field(&stats["buy"]),
            ask: price_field(&stats["sell"]),
            last: price_field(&stats["last"]),
            quote_volume: volume_field(&stats["volValue"]),
        })
    }

    fn parse_markets(body: &Value) -> Result<Vec<TradingPair>, ExchangeError> {
        let symbols = Self::data(body)?
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing symbol list".to_string()))?;

        Ok(symbols
            .iter()
            .filter(|s| s["enableTrading"].as_bool().unwrap_or(true))
            .filter_map(|s| {
                Some(TradingPair::new(
                    s["baseCurrency"].as_str()?,
                    s["quoteCurrency"].as_str()?,
                ))
            })
            .collect())
    }
}

#[async_trait]
impl ExchangeConnector for KucoinConnector {
    fn id(&self) -> ExchangeId {
        ExchangeId::new("kucoin")
    }

    async fn load_markets(&self) -> Result<Vec<TradingPair>, ExchangeError> {
        let url = format!("{}/api/v2/symbols", self.base_url);
        let body = get_json(&self.client, &url).await?;
        Self::parse_markets(&body)
    }

    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let url = format!(
            "{}/api/v1/market/stats?symbol={}",
            self.base_url,
            Self::symbol(pair)
        );
        let body = get_json(&self.client, &url).await?;
        Self::parse_ticker(&body, pair)
    }
}
