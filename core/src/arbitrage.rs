use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::types::*;

/// Detects cross-exchange arbitrage opportunities in one cycle's quotes.
///
/// For every pair of exchanges quoting the same symbol both directions are
/// evaluated (buy at one's ask, sell at the other's bid). Results across all
/// symbols are sorted by gross profit, highest first. No I/O and no state:
/// the same map, config and timestamp always give the same output.
pub fn detect(
    quotes: &QuoteMap,
    config: &DetectorConfig,
    detected_at: DateTime<Utc>,
) -> Vec<ArbitrageOpportunity> {
    let mut opportunities = Vec::new();

    for by_exchange in quotes.values() {
        let reporting: Vec<&Quote> = by_exchange.values().collect();

        for (i, first) in reporting.iter().enumerate() {
            for second in &reporting[i + 1..] {
                if first.exchange == second.exchange {
                    continue;
                }

                // Direction 1: buy on the first exchange, sell on the second
                if let Some(opp) = evaluate_spread(first, second, config, detected_at) {
                    opportunities.push(opp);
                }

                // Direction 2: buy on the second exchange, sell on the first
                if let Some(opp) = evaluate_spread(second, first, config, detected_at) {
                    opportunities.push(opp);
                }
            }
        }
    }

    // Stable sort keeps map order among equal profits
    opportunities.sort_by(|a, b| b.profit_pct.cmp(&a.profit_pct));
    opportunities
}

/// Evaluate a specific buy/sell direction for profitability
fn evaluate_spread(
    buy_quote: &Quote,  // We buy at the ask price here
    sell_quote: &Quote, // We sell at the bid price here
    config: &DetectorConfig,
    detected_at: DateTime<Utc>,
) -> Option<ArbitrageOpportunity> {
    let buy_price = buy_quote.usable_ask()?;
    let sell_price = sell_quote.usable_bid()?;

    // Gross spread percentage
    let profit_pct = ((sell_price - buy_price) / buy_price) * dec!(100);
    let net_profit_pct = profit_pct - config.round_trip_fee_pct;

    if net_profit_pct <= config.min_profit_pct {
        return None;
    }

    let volume = buy_quote.quote_volume.min(sell_quote.quote_volume);
    let trade_size = ((buy_quote.quote_volume + sell_quote.quote_volume)
        * config.volume_participation_pct
        / dec!(100))
    .min(config.max_trade_size)
    .max(Decimal::ZERO);
    let potential_profit = (trade_size * profit_pct / dec!(100)).max(Decimal::ZERO);

    debug!(
        "Opportunity: Buy {} @ {} on {}, Sell @ {} on {} | Spread: {}% (net: {}%)",
        buy_quote.pair,
        buy_price,
        buy_quote.exchange,
        sell_price,
        sell_quote.exchange,
        profit_pct.round_dp(4),
        net_profit_pct.round_dp(4),
    );

    Some(ArbitrageOpportunity {
        pair: buy_quote.pair.clone(),
        buy_exchange: buy_quote.exchange.clone(),
        sell_exchange: sell_quote.exchange.clone(),
        buy_price,
        sell_price,
        profit_pct,
        net_profit_pct,
        volume,
        trade_size,
        potential_profit,
        detected_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{quote, quote_map};

    const PAIR: &str = "BTC/USDT";

    fn config(min_profit_pct: Decimal) -> DetectorConfig {
        DetectorConfig {
            min_profit_pct,
            ..Default::default()
        }
    }

    fn close_to(actual: Decimal, expected: Decimal) -> bool {
        (actual - expected).abs() < dec!(0.0001)
    }

    #[test]
    fn scenario_single_profitable_direction() {
        let map = quote_map(vec![
            quote("x", PAIR, dec!(100), dec!(100.5), dec!(0)),
            quote("y", PAIR, dec!(101), dec!(101.2), dec!(0)),
        ]);

        let opps = detect(&map, &config(dec!(0.05)), Utc::now());

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.buy_exchange, ExchangeId::new("x"));
        assert_eq!(opp.sell_exchange, ExchangeId::new("y"));
        assert_eq!(opp.buy_price, dec!(100.5));
        assert_eq!(opp.sell_price, dec!(101));
        assert!(close_to(opp.profit_pct, dec!(0.4975)), "{}", opp.profit_pct);
    }

    #[test]
    fn threshold_above_spread_yields_nothing() {
        let map = quote_map(vec![
            quote("x", PAIR, dec!(100), dec!(100.5), dec!(0)),
            quote("y", PAIR, dec!(101), dec!(101.2), dec!(0)),
        ]);

        assert!(detect(&map, &config(dec!(1.0)), Utc::now()).is_empty());
    }

    #[test]
    fn threshold_is_strict() {
        // (100.1 - 100) / 100 * 100 = 0.1 exactly
        let map = quote_map(vec![
            quote("x", PAIR, dec!(99), dec!(100), dec!(0)),
            quote("y", PAIR, dec!(100.1), dec!(101), dec!(0)),
        ]);

        assert!(detect(&map, &config(dec!(0.1)), Utc::now()).is_empty());
        assert_eq!(detect(&map, &config(dec!(0.09)), Utc::now()).len(), 1);
    }

    #[test]
    fn lone_exchange_yields_nothing() {
        let mut map = quote_map(vec![quote("x", PAIR, dec!(100), dec!(100.5), dec!(0))]);
        map.entry(TradingPair::new("ETH", "USDT")).or_default();

        assert!(detect(&map, &config(dec!(0.05)), Utc::now()).is_empty());
        assert!(detect(&QuoteMap::new(), &config(dec!(0.05)), Utc::now()).is_empty());
    }

    #[test]
    fn missing_or_zero_prices_skip_only_that_direction() {
        let mut x = quote("x", PAIR, dec!(102), dec!(100), dec!(0));
        let mut y = quote("y", PAIR, dec!(101), dec!(101.5), dec!(0));
        // x -> y still works (x ask 100, y bid 101); y -> x needs y's ask
        y.ask = None;
        let opps = detect(&quote_map(vec![x.clone(), y.clone()]), &config(dec!(0)), Utc::now());
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].buy_exchange, ExchangeId::new("x"));

        x.ask = Some(Decimal::ZERO);
        assert!(detect(&quote_map(vec![x, y]), &config(dec!(0)), Utc::now()).is_empty());
    }

    #[test]
    fn both_directions_can_qualify() {
        // Crossed books on both sides: each exchange bids above the other's ask
        let map = quote_map(vec![
            quote("x", PAIR, dec!(103), dec!(100), dec!(0)),
            quote("y", PAIR, dec!(102), dec!(101), dec!(0)),
        ]);

        let opps = detect(&map, &config(dec!(0.05)), Utc::now());
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].buy_exchange, ExchangeId::new("x"));
        assert_eq!(opps[1].buy_exchange, ExchangeId::new("y"));
    }

    #[test]
    fn results_are_sorted_traceable_and_never_self_paired() {
        let map = quote_map(vec![
            quote("a", PAIR, dec!(100), dec!(100.2), dec!(5000)),
            quote("b", PAIR, dec!(100.9), dec!(101), dec!(8000)),
            quote("c", PAIR, dec!(101.5), dec!(101.7), dec!(1000)),
            quote("a", "ETH/USDT", dec!(3000), dec!(3001), dec!(0)),
            quote("c", "ETH/USDT", dec!(3020), dec!(3021), dec!(0)),
        ]);

        let opps = detect(&map, &config(dec!(0.05)), Utc::now());
        assert!(opps.len() >= 4);

        for window in opps.windows(2) {
            assert!(window[0].profit_pct >= window[1].profit_pct);
        }
        for opp in &opps {
            assert_ne!(opp.buy_exchange, opp.sell_exchange);
            assert!(opp.profit_pct > dec!(0.05));
            let by_exchange = &map[&opp.pair];
            assert_eq!(Some(opp.buy_price), by_exchange[&opp.buy_exchange].ask);
            assert_eq!(Some(opp.sell_price), by_exchange[&opp.sell_exchange].bid);
            let expected = (opp.sell_price - opp.buy_price) / opp.buy_price * dec!(100);
            assert!(close_to(opp.profit_pct, expected));
            assert!(opp.volume >= Decimal::ZERO);
            assert!(opp.potential_profit >= Decimal::ZERO);
        }
    }

    #[test]
    fn detect_is_idempotent() {
        let map = quote_map(vec![
            quote("a", PAIR, dec!(100), dec!(100.2), dec!(5000)),
            quote("b", PAIR, dec!(100.9), dec!(101), dec!(8000)),
            quote("c", PAIR, dec!(101.5), dec!(101.7), dec!(1000)),
        ]);
        let at = Utc::now();
        let cfg = config(dec!(0.05));

        assert_eq!(detect(&map, &cfg, at), detect(&map, &cfg, at));
    }

    #[test]
    fn trade_size_uses_participation_and_cap() {
        let map = quote_map(vec![
            quote("x", PAIR, dec!(100), dec!(100), dec!(40000)),
            quote("y", PAIR, dec!(101), dec!(102), dec!(60000)),
        ]);

        // 0.5% of 100_000 = 500, below the 1000 cap
        let opps = detect(&map, &config(dec!(0.05)), Utc::now());
        assert_eq!(opps[0].volume, dec!(40000));
        assert_eq!(opps[0].trade_size, dec!(500));
        assert_eq!(opps[0].potential_profit, dec!(5)); // 500 * 1%

        let capped = DetectorConfig {
            max_trade_size: dec!(200),
            ..config(dec!(0.05))
        };
        let opps = detect(&map, &capped, Utc::now());
        assert_eq!(opps[0].trade_size, dec!(200));
        assert_eq!(opps[0].potential_profit, dec!(2));
    }

    #[test]
    fn round_trip_fee_is_deducted_before_threshold() {
        let map = quote_map(vec![
            quote("x", PAIR, dec!(100), dec!(100.5), dec!(0)),
            quote("y", PAIR, dec!(101), dec!(101.2), dec!(0)),
        ]);

        let with_fee = DetectorConfig {
            round_trip_fee_pct: dec!(0.2),
            ..config(dec!(0.05))
        };
        let opps = detect(&map, &with_fee, Utc::now());
        assert_eq!(opps.len(), 1);
        assert!(close_to(opps[0].net_profit_pct, dec!(0.2975)));
        assert!(close_to(opps[0].profit_pct, dec!(0.4975)));

        let heavy_fee = DetectorConfig {
            round_trip_fee_pct: dec!(0.5),
            ..config(dec!(0.05))
        };
        assert!(detect(&map, &heavy_fee, Utc::now()).is_empty());
    }

    #[test]
    fn potential_profit_uses_the_gross_spread() {
        let map = quote_map(vec![
            quote("x", PAIR, dec!(100), dec!(100), dec!(40000)),
            quote("y", PAIR, dec!(101), dec!(102), dec!(60000)),
        ]);
        let with_fee = DetectorConfig {
            round_trip_fee_pct: dec!(0.2),
            ..config(dec!(0.05))
        };

        let opps = detect(&map, &with_fee, Utc::now());
        assert_eq!(opps[0].profit_pct, dec!(1));
        assert_eq!(opps[0].net_profit_pct, dec!(0.8));
        assert_eq!(opps[0].trade_size, dec!(500));
        assert_eq!(opps[0].potential_profit, dec!(5));
    }
}
