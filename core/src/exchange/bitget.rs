use async_trait::async_trait;
use serde_json::Value;

use crate::config::ExchangeConfig;
use crate::exchange::{
    base_url, get_json, price_field, volume_field, ExchangeConnector, ExchangeError,
};
use crate::types::*;

const BITGET_REST_URL: &str = "https://api.bitget.com";

/// Bitget answers `"00000"` on success
const BITGET_OK: &str = "00000";

pub struct BitgetConnector {
    base_url: String,
    client: reqwest::Client,
}

impl BitgetConnector {
    pub fn new(config: &ExchangeConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url(config, BITGET_REST_URL),
            client,
        }
    }

    fn data(body: &Value) -> Result<&Value, ExchangeError> {
        if body["code"].as_str() == Some(BITGET_OK) {
            Ok(&body["data"])
        } else {
            Err(ExchangeError::Api(
                body["msg"].as_str().unwrap_or("Unknown error").to_string(),
            ))
        }
    }

    fn parse_ticker(body: &Value, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let item = &Self::data(body)?[0];
        if item.is_null() {
            return Err(ExchangeError::InvalidPair(pair.to_string()));
        }

        Ok(Ticker {
            bid: price_field(&item["bidPr"]),
            ask: price_field(&item["askPr"]),
            last: price_field(&item["lastPr"]),
            quote_volume: volume_field(&item["quoteVolume"]),
        })
    }

    fn parse_markets(body: &Value) -> Result<Vec<TradingPair>, ExchangeError> {
        let symbols = Self::data(body)?
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("missing symbol list".to_string()))?;

        Ok(symbols
            .iter()
            .filter(|s| s["status"].as_str().map_or(true, |st| st == "online"))
            .filter_map(|s| {
                Some(TradingPair::new(
                    s["baseCoin"].as_str()?,
                    s["quoteCoin"].as_str()?,
                ))
            })
            .collect())
    }
}

#[async_trait]
impl ExchangeConnector for BitgetConnector {
    fn id(&self) -> ExchangeId {
        ExchangeId::new("bitget")
    }

    async fn load_markets(&self) -> Result<Vec<TradingPair>, ExchangeError> {
        let url = format!("{}/api/v2/spot/public/symbols", self.base_url);
        let body = get_json(&self.client, &url).await?;
        Self::parse_markets(&body)
    }

    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let url = format!(
            "{}/api/v2/spot/market/tickers?symbol={}",
            self.base_url,
            pair.joined()
        );
        let body = get_json(&self.client, &url).await?;
        Self::parse_ticker(&body, pair)
    }
}
