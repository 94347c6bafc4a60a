//! Brokerage service tests over the in-memory backend: trade placement,
//! per-key serialization, views, and error surfacing.

use std::collections::HashMap;
use std::sync::Arc;

use paper_exchange::brokerage::{Brokerage, Event};
use paper_exchange::error::{StoreError, TradeError};
use paper_exchange::feed::PriceFeed;
use paper_exchange::ledger::{PositionChange, SellPolicy};
use paper_exchange::persistence::{MemoryStore, SharedStore, Store};
use paper_exchange::types::account::{Account, Role};
use paper_exchange::types::position::Position;
use paper_exchange::types::trade::{TradeRecord, TradeSide};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn fixed_feed() -> PriceFeed {
    let mut prices = HashMap::new();
    prices.insert("AAPL".to_string(), dec!(100.00));
    prices.insert("MSFT".to_string(), dec!(250.00));
    PriceFeed::with_prices(prices)
}

fn brokerage(policy: SellPolicy) -> (Arc<Brokerage>, SharedStore) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let brokerage = Arc::new(Brokerage::new(store.clone(), fixed_feed(), policy));
    (brokerage, store)
}

async fn trader(brokerage: &Brokerage, name: &str) -> Uuid {
    brokerage
        .signup(name, &format!("{name}@example.com"), "pw123456", Role::Trader)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn buy_creates_position_and_record() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    let (position, record) = brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 10)
        .await
        .unwrap();

    let position = position.unwrap();
    assert_eq!(position.quantity, 10);
    assert_eq!(position.avg_cost, dec!(100.00));
    assert_eq!(record.side, TradeSide::Buy);
    assert_eq!(record.price, dec!(100.00));

    let stored = store.position(alice, "AAPL").await.unwrap().unwrap();
    assert_eq!(stored, position);
    assert_eq!(store.trade_count().await.unwrap(), 1);
}

#[tokio::test]
async fn symbol_is_case_insensitive() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    brokerage
        .place_trade(alice, "aapl", TradeSide::Buy, 1)
        .await
        .unwrap();

    assert!(store.position(alice, "AAPL").await.unwrap().is_some());
}

#[tokio::test]
async fn two_identical_buys_double_the_position() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    for _ in 0..2 {
        brokerage
            .place_trade(alice, "AAPL", TradeSide::Buy, 5)
            .await
            .unwrap();
    }

    let stored = store.position(alice, "AAPL").await.unwrap().unwrap();
    assert_eq!(stored.quantity, 10);
    assert_eq!(store.trade_count().await.unwrap(), 2);
}

#[tokio::test]
async fn rejected_sell_writes_nothing() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    let err = brokerage
        .place_trade(alice, "AAPL", TradeSide::Sell, 5)
        .await
        .unwrap_err();

    assert!(matches!(err, TradeError::InsufficientShares { .. }));
    assert!(store.position(alice, "AAPL").await.unwrap().is_none());
    assert_eq!(store.trade_count().await.unwrap(), 0);
    assert!(store.trades_for_account(alice, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_symbol_rejected_before_any_write() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    let err = brokerage
        .place_trade(alice, "WAT", TradeSide::Buy, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, TradeError::UnknownSymbol(_)));
    assert_eq!(store.trade_count().await.unwrap(), 0);
}

#[tokio::test]
async fn permissive_policy_allows_short_sale() {
    let (brokerage, store) = brokerage(SellPolicy::Permissive);
    let alice = trader(&brokerage, "alice").await;

    let (position, _) = brokerage
        .place_trade(alice, "MSFT", TradeSide::Sell, 3)
        .await
        .unwrap();

    let position = position.unwrap();
    assert_eq!(position.quantity, -3);
    assert_eq!(position.avg_cost, dec!(250.00));
    assert_eq!(store.trade_count().await.unwrap(), 1);
}

#[tokio::test]
async fn closing_trade_returns_no_position() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 4)
        .await
        .unwrap();
    let (position, _) = brokerage
        .place_trade(alice, "AAPL", TradeSide::Sell, 4)
        .await
        .unwrap();

    assert!(position.is_none());
    assert!(store.position(alice, "AAPL").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_buys_on_one_key_all_count() {
    let (brokerage, store) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let brokerage = brokerage.clone();
        handles.push(tokio::spawn(async move {
            brokerage
                .place_trade(alice, "AAPL", TradeSide::Buy, 1)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = store.position(alice, "AAPL").await.unwrap().unwrap();
    assert_eq!(stored.quantity, 10);
    assert_eq!(store.trade_count().await.unwrap(), 10);
}

#[tokio::test]
async fn portfolio_joins_live_prices() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 10)
        .await
        .unwrap();
    brokerage
        .place_trade(alice, "MSFT", TradeSide::Buy, 2)
        .await
        .unwrap();

    let entries = brokerage.portfolio(alice).await.unwrap();
    assert_eq!(entries.len(), 2);
    // Sorted by symbol.
    assert_eq!(entries[0].symbol, "AAPL");
    assert_eq!(entries[0].quantity, 10);
    assert_eq!(entries[0].current_price, Some(dec!(100.00)));
    assert_eq!(entries[0].market_value, Some(dec!(1000.00)));
    assert_eq!(entries[0].unrealized_pnl, Some(dec!(0.00)));
    assert_eq!(entries[1].symbol, "MSFT");
    assert_eq!(entries[1].market_value, Some(dec!(500.00)));
}

#[tokio::test]
async fn history_is_newest_first_with_limit() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;

    brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 1)
        .await
        .unwrap();
    brokerage
        .place_trade(alice, "MSFT", TradeSide::Buy, 2)
        .await
        .unwrap();
    brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 3)
        .await
        .unwrap();

    let trades = brokerage.history(alice, 2).await.unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].quantity, 3);
    assert_eq!(trades[1].quantity, 2);
}

#[tokio::test]
async fn duplicate_username_or_email_rejected() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);
    trader(&brokerage, "alice").await;

    let err = brokerage
        .signup("alice", "other@example.com", "pw", Role::Trader)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::DuplicateAccount));

    let err = brokerage
        .signup("alice2", "alice@example.com", "pw", Role::Trader)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::DuplicateAccount));
}

#[tokio::test]
async fn login_validates_password_and_role() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);
    trader(&brokerage, "alice").await;

    let account = brokerage
        .login("alice@example.com", "pw123456", Role::Trader)
        .await
        .unwrap();
    assert_eq!(account.username, "alice");

    let err = brokerage
        .login("alice@example.com", "wrong", Role::Trader)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::InvalidCredentials));

    // Right password, wrong role: same rejection.
    let err = brokerage
        .login("alice@example.com", "pw123456", Role::Admin)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::InvalidCredentials));
}

#[tokio::test]
async fn username_available_reflects_signups() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);

    assert!(brokerage.username_available("alice").await.unwrap());
    trader(&brokerage, "alice").await;
    assert!(!brokerage.username_available("alice").await.unwrap());
    // Usernames are stored lowercase.
    assert!(!brokerage.username_available("Alice").await.unwrap());
    assert!(!brokerage.username_available("").await.unwrap());
}

#[tokio::test]
async fn trade_events_are_broadcast() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;
    let mut events = brokerage.subscribe();

    brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 5)
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        Event::Trade { symbol, trade } => {
            assert_eq!(symbol, "AAPL");
            assert_eq!(trade.quantity, 5);
            assert_eq!(trade.account_id, alice);
        }
        other => panic!("expected trade event, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_views_aggregate_across_traders() {
    let (brokerage, _) = brokerage(SellPolicy::Strict);
    let alice = trader(&brokerage, "alice").await;
    let bob = trader(&brokerage, "bob").await;

    brokerage
        .place_trade(alice, "AAPL", TradeSide::Buy, 10)
        .await
        .unwrap();
    brokerage
        .place_trade(bob, "MSFT", TradeSide::Buy, 4)
        .await
        .unwrap();
    brokerage
        .place_trade(bob, "MSFT", TradeSide::Sell, 2)
        .await
        .unwrap();

    let stats = brokerage.stats().await.unwrap();
    assert_eq!(stats.total_traders, 2);
    assert_eq!(stats.total_trades, 3);
    // 10 * 100.00 + 2 * 250.00
    assert_eq!(stats.total_book_value, dec!(1500.00));

    let portfolios = brokerage.all_portfolios().await.unwrap();
    assert_eq!(portfolios.len(), 2);
    assert_eq!(portfolios[0].username, "alice");
    assert_eq!(portfolios[0].symbol, "AAPL");
    assert_eq!(portfolios[1].username, "bob");
    assert_eq!(portfolios[1].quantity, 2);

    let history = brokerage.all_history(10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].username, "bob");
    assert_eq!(history[0].trade.side, TradeSide::Sell);

    // Newest signup first.
    let summaries = brokerage.trader_summaries().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].username, "bob");
    assert_eq!(summaries[0].book_value, dec!(500.00));
    assert_eq!(summaries[0].symbols_held, 1);
    assert_eq!(summaries[1].username, "alice");
    assert_eq!(summaries[1].book_value, dec!(1000.00));
}

/// Store whose every call fails, for checking that backend failures
/// surface instead of being swallowed.
struct FailingStore;

fn down() -> StoreError {
    StoreError::Corrupt("store offline".to_string())
}

#[async_trait::async_trait]
impl Store for FailingStore {
    async fn insert_account(&self, _: &Account) -> Result<(), StoreError> {
        Err(down())
    }
    async fn account_by_email(&self, _: &str) -> Result<Option<Account>, StoreError> {
        Err(down())
    }
    async fn username_taken(&self, _: &str) -> Result<bool, StoreError> {
        Err(down())
    }
    async fn email_taken(&self, _: &str) -> Result<bool, StoreError> {
        Err(down())
    }
    async fn accounts_with_role(&self, _: Role) -> Result<Vec<Account>, StoreError> {
        Err(down())
    }
    async fn position(&self, _: Uuid, _: &str) -> Result<Option<Position>, StoreError> {
        Err(down())
    }
    async fn positions_for_account(&self, _: Uuid) -> Result<Vec<Position>, StoreError> {
        Err(down())
    }
    async fn all_positions(&self) -> Result<Vec<Position>, StoreError> {
        Err(down())
    }
    async fn trades_for_account(&self, _: Uuid, _: usize) -> Result<Vec<TradeRecord>, StoreError> {
        Err(down())
    }
    async fn all_trades(&self, _: usize) -> Result<Vec<TradeRecord>, StoreError> {
        Err(down())
    }
    async fn trade_count(&self) -> Result<u64, StoreError> {
        Err(down())
    }
    async fn commit_trade(&self, _: &PositionChange, _: &TradeRecord) -> Result<(), StoreError> {
        Err(down())
    }
}

#[tokio::test]
async fn storage_failures_surface_as_errors() {
    let store: SharedStore = Arc::new(FailingStore);
    let brokerage = Brokerage::new(store, fixed_feed(), SellPolicy::Strict);

    let err = brokerage
        .signup("alice", "alice@example.com", "pw", Role::Trader)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Storage(_)));

    let err = brokerage
        .place_trade(Uuid::new_v4(), "AAPL", TradeSide::Buy, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::Storage(_)));

    let err = brokerage.portfolio(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, TradeError::Storage(_)));
}
