use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position per (account, symbol). Quantity is signed: positive = long, negative = short.
/// A quantity of zero is never stored; the row is deleted instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: Uuid,
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
}
