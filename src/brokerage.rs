//! Brokerage service: signup/login, trade placement, and the read views.
//! The HTTP layer is a thin shell over this; everything here is callable
//! (and tested) without a server.
//!
//! Trade placement is serialized per (account, symbol) key, so two
//! concurrent trades against the same position never interleave their
//! read-modify-write. Validation runs before anything is written.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TradeError;
use crate::feed::PriceFeed;
use crate::ledger::{self, PositionChange, SellPolicy, TradeIntent};
use crate::persistence::SharedStore;
use crate::types::account::{Account, Role};
use crate::types::position::Position;
use crate::types::trade::{TradeRecord, TradeSide};

/// Event fanned out to WebSocket subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Trade { symbol: String, trade: TradeRecord },
    Price { symbol: String, price: Decimal },
}

/// One portfolio row: the stored position joined with the live price.
/// Price fields are `None` when the feed no longer carries the symbol.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioEntry {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Totals for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_traders: u64,
    pub total_trades: u64,
    /// Sum of quantity * avg_cost over every open position.
    pub total_book_value: Decimal,
}

/// One row of the admin portfolios view.
#[derive(Debug, Clone, Serialize)]
pub struct AccountPosition {
    pub username: String,
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
}

/// One row of the admin history view.
#[derive(Debug, Clone, Serialize)]
pub struct AccountTrade {
    pub username: String,
    #[serde(flatten)]
    pub trade: TradeRecord,
}

/// Per-trader roll-up for the admin manage view.
#[derive(Debug, Clone, Serialize)]
pub struct TraderSummary {
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub book_value: Decimal,
    pub symbols_held: usize,
}

type TradeLocks = Mutex<HashMap<(Uuid, String), Arc<Mutex<()>>>>;

pub struct Brokerage {
    store: SharedStore,
    feed: PriceFeed,
    policy: SellPolicy,
    events: broadcast::Sender<Event>,
    trade_locks: TradeLocks,
}

impl Brokerage {
    pub fn new(store: SharedStore, feed: PriceFeed, policy: SellPolicy) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store,
            feed,
            policy,
            events,
            trade_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sender half of the event stream (the price refresher feeds it too).
    pub fn events(&self) -> broadcast::Sender<Event> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn feed(&self) -> &PriceFeed {
        &self.feed
    }

    pub fn sell_policy(&self) -> SellPolicy {
        self.policy
    }

    /// Create an account. Username and email are lowercased and must be unused.
    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<Account, TradeError> {
        let username = username.trim().to_lowercase();
        let email = email.trim().to_lowercase();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(TradeError::MissingCredentials);
        }
        if self.store.username_taken(&username).await? || self.store.email_taken(&email).await? {
            return Err(TradeError::DuplicateAccount);
        }

        let account = Account {
            id: Uuid::new_v4(),
            username,
            email,
            role,
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };
        self.store.insert_account(&account).await?;
        info!(username = %account.username, role = role.as_str(), "Account created");
        Ok(account)
    }

    /// Validate email, password and expected role. A role mismatch is
    /// indistinguishable from a bad password.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<Account, TradeError> {
        let email = email.trim().to_lowercase();
        let Some(account) = self.store.account_by_email(&email).await? else {
            return Err(TradeError::InvalidCredentials);
        };
        if !verify_password(password, &account.password_hash) || account.role != role {
            return Err(TradeError::InvalidCredentials);
        }
        Ok(account)
    }

    /// Whether a username is still free (for signup forms to poll).
    pub async fn username_available(&self, username: &str) -> Result<bool, TradeError> {
        let username = username.trim().to_lowercase();
        if username.is_empty() {
            return Ok(false);
        }
        Ok(!self.store.username_taken(&username).await?)
    }

    /// Apply one trade end to end: snapshot the price, serialize on the
    /// (account, symbol) key, run the ledger against the stored position,
    /// commit the outcome atomically, broadcast it. Rejections write nothing.
    ///
    /// Returns the resulting position (`None` when the trade closed it)
    /// and the trade record.
    pub async fn place_trade(
        &self,
        account_id: Uuid,
        symbol: &str,
        side: TradeSide,
        quantity: i64,
    ) -> Result<(Option<Position>, TradeRecord), TradeError> {
        if quantity <= 0 {
            return Err(TradeError::InvalidQuantity);
        }
        let symbol = symbol.trim().to_uppercase();
        let Some(price) = self.feed.price_of(&symbol).await else {
            return Err(TradeError::UnknownSymbol(symbol));
        };

        let key_lock = self.key_lock(account_id, &symbol).await;
        let _guard = key_lock.lock().await;

        let current = self.store.position(account_id, &symbol).await?;
        let intent = TradeIntent {
            account_id,
            symbol: symbol.clone(),
            side,
            quantity,
            price,
        };
        let outcome = match ledger::apply_trade(self.policy, &intent, current.as_ref(), Utc::now())
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(account = %account_id, symbol = %symbol, error = %err, "Trade rejected");
                return Err(err);
            }
        };
        self.store
            .commit_trade(&outcome.change, &outcome.record)
            .await?;

        let position = match &outcome.change {
            PositionChange::Upsert(pos) => Some(pos.clone()),
            PositionChange::Delete { .. } => None,
        };
        info!(
            account = %account_id,
            symbol = %symbol,
            side = side.as_str(),
            quantity,
            price = %price,
            "Trade executed"
        );
        let _ = self.events.send(Event::Trade {
            symbol,
            trade: outcome.record.clone(),
        });
        Ok((position, outcome.record))
    }

    async fn key_lock(&self, account_id: Uuid, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.trade_locks.lock().await;
        locks
            .entry((account_id, symbol.to_string()))
            .or_default()
            .clone()
    }

    /// Portfolio rows for one account, joined with the current price board.
    pub async fn portfolio(&self, account_id: Uuid) -> Result<Vec<PortfolioEntry>, TradeError> {
        let positions = self.store.positions_for_account(account_id).await?;
        let prices = self.feed.snapshot().await;
        Ok(positions
            .into_iter()
            .map(|pos| {
                let current = prices.get(&pos.symbol).copied();
                PortfolioEntry {
                    current_price: current,
                    market_value: current.map(|p| p * Decimal::from(pos.quantity)),
                    unrealized_pnl: current.map(|p| (p - pos.avg_cost) * Decimal::from(pos.quantity)),
                    symbol: pos.symbol,
                    quantity: pos.quantity,
                    avg_cost: pos.avg_cost,
                }
            })
            .collect())
    }

    /// Trade history for one account, newest first.
    pub async fn history(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, TradeError> {
        Ok(self.store.trades_for_account(account_id, limit).await?)
    }

    /// Current price board (for GET /prices).
    pub async fn prices(&self) -> HashMap<String, Decimal> {
        self.feed.snapshot().await
    }

    pub async fn stats(&self) -> Result<Stats, TradeError> {
        let traders = self.store.accounts_with_role(Role::Trader).await?;
        let total_trades = self.store.trade_count().await?;
        let positions = self.store.all_positions().await?;
        let total_book_value = positions
            .iter()
            .map(|p| p.avg_cost * Decimal::from(p.quantity))
            .sum();
        Ok(Stats {
            total_traders: traders.len() as u64,
            total_trades,
            total_book_value,
        })
    }

    /// Every open position with its owner's username, sorted by username.
    pub async fn all_portfolios(&self) -> Result<Vec<AccountPosition>, TradeError> {
        let positions = self.store.all_positions().await?;
        let usernames = self.username_index().await?;
        let mut rows: Vec<AccountPosition> = positions
            .into_iter()
            .map(|pos| AccountPosition {
                username: display_name(&usernames, pos.account_id),
                symbol: pos.symbol,
                quantity: pos.quantity,
                avg_cost: pos.avg_cost,
            })
            .collect();
        rows.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(rows)
    }

    /// Every trade with its owner's username, newest first.
    pub async fn all_history(&self, limit: usize) -> Result<Vec<AccountTrade>, TradeError> {
        let trades = self.store.all_trades(limit).await?;
        let usernames = self.username_index().await?;
        Ok(trades
            .into_iter()
            .map(|trade| AccountTrade {
                username: display_name(&usernames, trade.account_id),
                trade,
            })
            .collect())
    }

    /// Per-trader roll-up, newest signup first.
    pub async fn trader_summaries(&self) -> Result<Vec<TraderSummary>, TradeError> {
        let traders = self.store.accounts_with_role(Role::Trader).await?;
        let positions = self.store.all_positions().await?;
        let mut by_account: HashMap<Uuid, (Decimal, usize)> = HashMap::new();
        for pos in positions {
            let entry = by_account
                .entry(pos.account_id)
                .or_insert((Decimal::ZERO, 0));
            entry.0 += pos.avg_cost * Decimal::from(pos.quantity);
            entry.1 += 1;
        }
        Ok(traders
            .into_iter()
            .map(|account| {
                let (book_value, symbols_held) = by_account
                    .get(&account.id)
                    .copied()
                    .unwrap_or((Decimal::ZERO, 0));
                TraderSummary {
                    username: account.username,
                    email: account.email,
                    created_at: account.created_at,
                    book_value,
                    symbols_held,
                }
            })
            .collect())
    }

    async fn username_index(&self) -> Result<HashMap<Uuid, String>, TradeError> {
        let traders = self.store.accounts_with_role(Role::Trader).await?;
        Ok(traders.into_iter().map(|a| (a.id, a.username)).collect())
    }
}

/// Username for display; falls back to the raw id for rows whose account
/// is gone rather than hiding them.
fn display_name(usernames: &HashMap<Uuid, String>, account_id: Uuid) -> String {
    usernames
        .get(&account_id)
        .cloned()
        .unwrap_or_else(|| account_id.to_string())
}

fn hash_password(password: &str) -> Result<String, TradeError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| TradeError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
