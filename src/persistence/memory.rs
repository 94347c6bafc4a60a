//! In-memory key-value backend: accounts by id, positions keyed by
//! (account, symbol), trades in an append-only log.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::PositionChange;
use crate::types::account::{Account, Role};
use crate::types::position::Position;
use crate::types::trade::TradeRecord;

use super::Store;

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    positions: HashMap<(Uuid, String), Position>,
    trades: Vec<TradeRecord>,
}

/// In-memory store for tests and single-process runs. All tables sit behind
/// one lock, so a trade commit is a single atomic mutation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().any(|a| a.username == username))
    }

    async fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().any(|a| a.email == email))
    }

    async fn accounts_with_role(&self, role: Role) -> Result<Vec<Account>, StoreError> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.role == role)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(accounts)
    }

    async fn position(
        &self,
        account_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .positions
            .get(&(account_id, symbol.to_string()))
            .cloned())
    }

    async fn positions_for_account(&self, account_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.read().await;
        let mut positions: Vec<Position> = tables
            .positions
            .iter()
            .filter(|((id, _), _)| *id == account_id)
            .map(|(_, pos)| pos.clone())
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn all_positions(&self) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.read().await;
        let mut positions: Vec<Position> = tables.positions.values().cloned().collect();
        positions.sort_by(|a, b| {
            a.account_id
                .cmp(&b.account_id)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(positions)
    }

    async fn trades_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let tables = self.tables.read().await;
        // The log is append-ordered, so newest first = reverse.
        Ok(tables
            .trades
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.trades.iter().rev().take(limit).cloned().collect())
    }

    async fn trade_count(&self) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.trades.len() as u64)
    }

    async fn commit_trade(
        &self,
        change: &PositionChange,
        record: &TradeRecord,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match change {
            PositionChange::Upsert(pos) => {
                tables
                    .positions
                    .insert((pos.account_id, pos.symbol.clone()), pos.clone());
            }
            PositionChange::Delete { account_id, symbol } => {
                tables.positions.remove(&(*account_id, symbol.clone()));
            }
        }
        tables.trades.push(record.clone());
        Ok(())
    }
}
