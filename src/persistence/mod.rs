//! Storage layer: the `Store` trait plus the relational (sqlite) and
//! in-memory key-value backends, selected by configuration.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::PositionChange;
use crate::types::account::{Account, Role};
use crate::types::position::Position;
use crate::types::trade::TradeRecord;

pub type SharedStore = Arc<dyn Store>;

/// State behind the brokerage: accounts, positions keyed by
/// (account, symbol), and the append-only trade log.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Account by email (lowercase). For login.
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError>;

    async fn email_taken(&self, email: &str) -> Result<bool, StoreError>;

    /// Accounts with the given role, newest signup first.
    async fn accounts_with_role(&self, role: Role) -> Result<Vec<Account>, StoreError>;

    /// Position for one (account, symbol) key, `None` when flat.
    async fn position(&self, account_id: Uuid, symbol: &str) -> Result<Option<Position>, StoreError>;

    /// Positions for one account (for the portfolio view).
    async fn positions_for_account(&self, account_id: Uuid) -> Result<Vec<Position>, StoreError>;

    /// Every open position (for the admin views).
    async fn all_positions(&self) -> Result<Vec<Position>, StoreError>;

    /// Trades for one account, newest first.
    async fn trades_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, StoreError>;

    /// Every trade, newest first (for the admin history).
    async fn all_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError>;

    async fn trade_count(&self) -> Result<u64, StoreError>;

    /// Persist an accepted trade. The position change and the trade record
    /// land together or not at all.
    async fn commit_trade(
        &self,
        change: &PositionChange,
        record: &TradeRecord,
    ) -> Result<(), StoreError>;
}
