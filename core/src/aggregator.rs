use chrono::Utc;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::exchange::{ExchangeClientPool, ExchangeError};
use crate::types::*;

/// Everything one polling cycle fetched
#[derive(Debug, Clone, Default)]
pub struct CycleQuotes {
    /// pair -> exchange -> quote, failed fetches absent
    pub by_pair: QuoteMap,
    /// Every successful quote, in fetch order, for the price history
    pub quotes: Vec<Quote>,
    pub failures: Vec<FetchFailure>,
}

struct FetchOutcome {
    order: (usize, usize),
    pair: TradingPair,
    exchange: ExchangeId,
    result: Result<Quote, ExchangeError>,
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub exchange: ExchangeId,
    pub pair: TradingPair,
    pub error: ExchangeError,
}

/// Fetch every (pair, exchange) quote for one cycle.
///
/// Each exchange gets its own lane with at most `per_exchange` fetches in
/// flight (0 means every listed pair at once), so a hung exchange only
/// delays its own lane, by at most one fetch timeout per lane slot. Outcomes
/// are merged afterwards in (pair, exchange) order, so each handle ends up
/// with the status of its last fetch exactly as a sequential pass would
/// leave it. A failed fetch leaves that exchange out of that pair's map and
/// never aborts the cycle.
pub async fn collect_cycle(
    pool: &mut ExchangeClientPool,
    pairs: &[TradingPair],
    per_exchange: usize,
) -> CycleQuotes {
    let exchanges = pool.connected_ids();

    let mut outcomes: Vec<FetchOutcome> = {
        let pool = &*pool;
        let lanes = exchanges.iter().enumerate().map(move |(exchange_idx, exchange)| {
            let jobs: Vec<(usize, TradingPair)> = pairs
                .iter()
                .enumerate()
                .filter(|(_, pair)| pool.lists(exchange, pair))
                .map(|(pair_idx, pair)| (pair_idx, pair.clone()))
                .collect();
            let width = match per_exchange {
                0 => jobs.len().max(1),
                n => n,
            };

            stream::iter(jobs)
                .map(move |(pair_idx, pair)| async move {
                    let result = pool.fetch_quote(exchange, &pair).await;
                    FetchOutcome {
                        order: (pair_idx, exchange_idx),
                        pair,
                        exchange: exchange.clone(),
                        result,
                    }
                })
                .buffer_unordered(width)
                .collect::<Vec<_>>()
        });
        join_all(lanes).await.into_iter().flatten().collect()
    };
    outcomes.sort_by_key(|outcome| outcome.order);

    let mut cycle = CycleQuotes::default();
    for pair in pairs {
        cycle.by_pair.entry(pair.clone()).or_default();
    }

    for FetchOutcome {
        pair,
        exchange,
        result,
        ..
    } in outcomes
    {
        match result {
            Ok(quote) => {
                pool.record_success(&exchange, quote.timestamp);
                cycle
                    .by_pair
                    .entry(pair)
                    .or_default()
                    .insert(exchange, quote.clone());
                cycle.quotes.push(quote);
            }
            Err(error) => {
                debug!("Error fetching {} from {}: {}", pair, exchange, error);
                pool.record_failure(&exchange, Utc::now());
                cycle.failures.push(FetchFailure {
                    exchange,
                    pair,
                    error,
                });
            }
        }
    }

    if !cycle.failures.is_empty() {
        warn!(
            "{} of {} quote fetches failed this cycle",
            cycle.failures.len(),
            cycle.failures.len() + cycle.quotes.len()
        );
    }

    cycle
}
