//! Error types for the brokerage and its storage backends.

use thiserror::Error;

/// Rejection or failure of a brokerage operation.
///
/// Rejections (`UnknownSymbol`, `InvalidQuantity`, `InsufficientShares`)
/// happen before anything is written: a rejected trade leaves no record
/// and no position change behind.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("quantity must be a positive whole number")]
    InvalidQuantity,

    #[error("insufficient shares: tried to sell {requested}, holding {held}")]
    InsufficientShares { requested: i64, held: i64 },

    #[error("username, email and password are required")]
    MissingCredentials,

    #[error("username or email already taken")]
    DuplicateAccount,

    #[error("incorrect email, password, or role")]
    InvalidCredentials,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),
}

/// Failure inside a storage backend. Never swallowed; callers surface it
/// as `TradeError::Storage`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
