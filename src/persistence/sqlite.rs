//! Relational backend over sqlite: schema setup at connect, row structs,
//! and row -> domain mappers.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ledger::PositionChange;
use crate::types::account::{Account, Role};
use crate::types::position::Position;
use crate::types::trade::{TradeRecord, TradeSide};

use super::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `database_url` and create the tables if they are missing.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Underlying pool (for maintenance queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                role TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                avg_cost TEXT NOT NULL,
                PRIMARY KEY (account_id, symbol)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                executed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trades_account
             ON trades (account_id, executed_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Row returned from DB (username and email are stored lowercase).
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    username: String,
    email: String,
    role: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

fn account_row_to_account(row: AccountRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: parse_uuid("account id", &row.id)?,
        role: Role::parse(&row.role)
            .ok_or_else(|| StoreError::Corrupt(format!("bad role: {}", row.role)))?,
        username: row.username,
        email: row.email,
        password_hash: row.password_hash,
        created_at: row.created_at,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct PositionRow {
    account_id: String,
    symbol: String,
    quantity: i64,
    avg_cost: String,
}

fn position_row_to_position(row: PositionRow) -> Result<Position, StoreError> {
    Ok(Position {
        account_id: parse_uuid("account id", &row.account_id)?,
        quantity: row.quantity,
        avg_cost: parse_decimal("avg_cost", &row.avg_cost)?,
        symbol: row.symbol,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct TradeRow {
    id: String,
    account_id: String,
    symbol: String,
    side: String,
    quantity: i64,
    price: String,
    executed_at: DateTime<Utc>,
}

fn trade_row_to_record(row: TradeRow) -> Result<TradeRecord, StoreError> {
    Ok(TradeRecord {
        id: parse_uuid("trade id", &row.id)?,
        account_id: parse_uuid("account id", &row.account_id)?,
        side: TradeSide::parse(&row.side)
            .ok_or_else(|| StoreError::Corrupt(format!("bad side: {}", row.side)))?,
        quantity: row.quantity,
        price: parse_decimal("price", &row.price)?,
        symbol: row.symbol,
        executed_at: row.executed_at,
    })
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::Corrupt(format!("bad {field}: {raw}")))
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|_| StoreError::Corrupt(format!("bad {field}: {raw}")))
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO accounts (id, username, email, role, password_hash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(&account.email)
        .bind(account.role.as_str())
        .bind(&account.password_hash)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, email, role, password_hash, created_at \
             FROM accounts WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_row_to_account).transpose()
    }

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn accounts_with_role(&self, role: Role) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, email, role, password_hash, created_at \
             FROM accounts WHERE role = ? ORDER BY created_at DESC",
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(account_row_to_account).collect()
    }

    async fn position(
        &self,
        account_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query_as::<_, PositionRow>(
            "SELECT account_id, symbol, quantity, avg_cost \
             FROM positions WHERE account_id = ? AND symbol = ?",
        )
        .bind(account_id.to_string())
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(position_row_to_position).transpose()
    }

    async fn positions_for_account(&self, account_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT account_id, symbol, quantity, avg_cost \
             FROM positions WHERE account_id = ? ORDER BY symbol",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(position_row_to_position).collect()
    }

    async fn all_positions(&self) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT account_id, symbol, quantity, avg_cost \
             FROM positions ORDER BY account_id, symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(position_row_to_position).collect()
    }

    async fn trades_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT id, account_id, symbol, side, quantity, price, executed_at \
             FROM trades WHERE account_id = ? ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(account_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(trade_row_to_record).collect()
    }

    async fn all_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT id, account_id, symbol, side, quantity, price, executed_at \
             FROM trades ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(trade_row_to_record).collect()
    }

    async fn trade_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn commit_trade(
        &self,
        change: &PositionChange,
        record: &TradeRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        match change {
            PositionChange::Upsert(pos) => {
                sqlx::query(
                    "INSERT INTO positions (account_id, symbol, quantity, avg_cost) \
                     VALUES (?, ?, ?, ?) \
                     ON CONFLICT (account_id, symbol) DO UPDATE SET \
                     quantity = excluded.quantity, avg_cost = excluded.avg_cost",
                )
                .bind(pos.account_id.to_string())
                .bind(&pos.symbol)
                .bind(pos.quantity)
                .bind(pos.avg_cost.to_string())
                .execute(&mut *tx)
                .await?;
            }
            PositionChange::Delete { account_id, symbol } => {
                sqlx::query("DELETE FROM positions WHERE account_id = ? AND symbol = ?")
                    .bind(account_id.to_string())
                    .bind(symbol)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query(
            "INSERT INTO trades (id, account_id, symbol, side, quantity, price, executed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.account_id.to_string())
        .bind(&record.symbol)
        .bind(record.side.as_str())
        .bind(record.quantity)
        .bind(record.price.to_string())
        .bind(record.executed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
