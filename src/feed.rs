//! Price board: shared symbol -> price map with snapshot reads and a
//! fixed-interval background refresh applying a bounded random walk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::brokerage::Event;

/// Symbols carried by the simulated feed.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "AAPL", "GOOGL", "MSFT", "AMZN", "TSLA", "NVDA", "META", "NFLX", "ADBE", "CRM", "ORCL", "INTC",
    "AMD", "PYPL", "UBER", "SPOT", "TWTR", "SNAP", "SQ", "ZOOM", "SHOP", "ROKU", "PINS", "DOCU",
];

/// Largest single-refresh move, in basis points of the current price.
const MAX_STEP_BPS: i64 = 500;

/// Prices never reach zero, whatever the walk does.
const MIN_PRICE: Decimal = dec!(0.01);

/// Shared price board. Clones are cheap and read the same map.
#[derive(Clone)]
pub struct PriceFeed {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl PriceFeed {
    /// Board over the default symbols, each seeded uniformly in 50.00..=500.00.
    pub fn seeded() -> Self {
        let mut rng = rand::thread_rng();
        let prices = DEFAULT_SYMBOLS
            .iter()
            .map(|s| (s.to_string(), Decimal::new(rng.gen_range(5_000..=50_000), 2)))
            .collect();
        Self::with_prices(prices)
    }

    /// Board over a fixed set of prices (for tests).
    pub fn with_prices(prices: HashMap<String, Decimal>) -> Self {
        Self {
            prices: Arc::new(RwLock::new(prices)),
        }
    }

    /// Current price for one symbol, `None` when the feed does not carry it.
    pub async fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().await.get(symbol).copied()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        self.prices.read().await.contains_key(symbol)
    }

    /// Copy of the whole board.
    pub async fn snapshot(&self) -> HashMap<String, Decimal> {
        self.prices.read().await.clone()
    }

    /// One walk step over every symbol: multiply by a factor drawn from
    /// 1 +- 5%, round to cents. Returns the moved (symbol, price) pairs.
    pub async fn refresh(&self) -> Vec<(String, Decimal)> {
        let mut guard = self.prices.write().await;
        let mut rng = rand::thread_rng();
        let mut moves = Vec::with_capacity(guard.len());
        for (symbol, price) in guard.iter_mut() {
            let factor = Decimal::ONE + Decimal::new(rng.gen_range(-MAX_STEP_BPS..=MAX_STEP_BPS), 4);
            let mut next = (*price * factor).round_dp(2);
            next.rescale(2);
            *price = next.max(MIN_PRICE);
            moves.push((symbol.clone(), *price));
        }
        moves
    }
}

/// Spawn the background refresher. Each tick walks the board once and
/// broadcasts the new price of every symbol to WebSocket subscribers.
pub fn spawn_refresher(
    feed: PriceFeed,
    every: Duration,
    events: broadcast::Sender<Event>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let moves = feed.refresh().await;
            debug!(symbols = moves.len(), "prices refreshed");
            for (symbol, price) in moves {
                // Send fails only when nobody is subscribed.
                let _ = events.send(Event::Price { symbol, price });
            }
        }
    })
}
