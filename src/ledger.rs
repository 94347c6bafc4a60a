//! Position ledger: apply one trade intent to the stored position for
//! (account, symbol). Pure and testable without storage or HTTP.
//!
//! Accounting rules:
//! - adding to a position in its own direction blends the average cost,
//!   volume-weighted;
//! - reducing a position leaves the average cost untouched;
//! - crossing through zero resets the average cost to the trade price;
//! - reaching exactly zero deletes the position, never stores a zero row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::TradeError;
use crate::types::position::Position;
use crate::types::trade::{TradeRecord, TradeSide};

/// Decimal places kept on a stored average cost.
pub const AVG_COST_DP: u32 = 2;

/// How a SELL beyond the held quantity is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellPolicy {
    /// Reject sells larger than the held quantity. No record is written.
    Strict,
    /// Allow shorting: the oversold remainder becomes a negative position
    /// carried at the sale price.
    Permissive,
}

impl SellPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellPolicy::Strict => "strict",
            SellPolicy::Permissive => "permissive",
        }
    }

    pub fn parse(s: &str) -> Option<SellPolicy> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Some(SellPolicy::Strict),
            "permissive" => Some(SellPolicy::Permissive),
            _ => None,
        }
    }
}

/// A requested trade, validated against the current position when applied.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub account_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: i64,
    /// Feed price for the symbol, captured at acceptance time.
    pub price: Decimal,
}

/// Storage mutation produced by an accepted trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionChange {
    Upsert(Position),
    /// Quantity reached exactly zero; the row is removed.
    Delete { account_id: Uuid, symbol: String },
}

/// An accepted trade: the position mutation plus the immutable record.
/// The two are committed together or not at all.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub change: PositionChange,
    pub record: TradeRecord,
}

/// Apply one trade against the current position snapshot.
///
/// Validation happens before anything is produced: a rejected trade yields
/// no record and no position change.
pub fn apply_trade(
    policy: SellPolicy,
    intent: &TradeIntent,
    current: Option<&Position>,
    executed_at: DateTime<Utc>,
) -> Result<TradeOutcome, TradeError> {
    if intent.quantity <= 0 {
        return Err(TradeError::InvalidQuantity);
    }

    let change = match intent.side {
        TradeSide::Buy => buy(intent, current),
        TradeSide::Sell => sell(policy, intent, current)?,
    };

    let record = TradeRecord {
        id: Uuid::new_v4(),
        account_id: intent.account_id,
        symbol: intent.symbol.clone(),
        side: intent.side,
        quantity: intent.quantity,
        price: intent.price,
        executed_at,
    };

    Ok(TradeOutcome { change, record })
}

fn buy(intent: &TradeIntent, current: Option<&Position>) -> PositionChange {
    let (old_qty, old_avg) = match current {
        Some(pos) => (pos.quantity, pos.avg_cost),
        None => (0, Decimal::ZERO),
    };
    let new_qty = old_qty + intent.quantity;

    if new_qty == 0 {
        return delete(intent);
    }

    let new_avg = if old_qty >= 0 {
        // Opening or extending a long: volume-weighted blend.
        weighted_avg(old_qty, old_avg, intent.quantity, intent.price)
    } else if new_qty > 0 {
        // Short flipped long: basis resets to the purchase price.
        quantize(intent.price)
    } else {
        // Covering part of a short: basis unchanged.
        old_avg
    };

    upsert(intent, new_qty, new_avg)
}

fn sell(
    policy: SellPolicy,
    intent: &TradeIntent,
    current: Option<&Position>,
) -> Result<PositionChange, TradeError> {
    let Some(pos) = current else {
        return match policy {
            SellPolicy::Strict => Err(TradeError::InsufficientShares {
                requested: intent.quantity,
                held: 0,
            }),
            // No position to sell against: the whole quantity becomes a short
            // carried at the sale price.
            SellPolicy::Permissive => Ok(upsert(intent, -intent.quantity, quantize(intent.price))),
        };
    };

    if policy == SellPolicy::Strict && intent.quantity > pos.quantity {
        return Err(TradeError::InsufficientShares {
            requested: intent.quantity,
            held: pos.quantity,
        });
    }

    let new_qty = pos.quantity - intent.quantity;

    if new_qty == 0 {
        return Ok(delete(intent));
    }

    let new_avg = if pos.quantity > 0 && new_qty < 0 {
        // Long sold through zero: basis resets to the sale price.
        quantize(intent.price)
    } else {
        // Reducing a long or extending a short: basis unchanged. A sell
        // never blends; the average reflects acquisition, not disposal.
        pos.avg_cost
    };

    Ok(upsert(intent, new_qty, new_avg))
}

fn upsert(intent: &TradeIntent, quantity: i64, avg_cost: Decimal) -> PositionChange {
    PositionChange::Upsert(Position {
        account_id: intent.account_id,
        symbol: intent.symbol.clone(),
        quantity,
        avg_cost,
    })
}

fn delete(intent: &TradeIntent) -> PositionChange {
    PositionChange::Delete {
        account_id: intent.account_id,
        symbol: intent.symbol.clone(),
    }
}

/// Volume-weighted blend of the existing basis with the new purchase.
/// The result always lies between the old average and the trade price.
fn weighted_avg(old_qty: i64, old_avg: Decimal, qty: i64, price: Decimal) -> Decimal {
    let total = old_avg * Decimal::from(old_qty) + price * Decimal::from(qty);
    quantize(total / Decimal::from(old_qty + qty))
}

/// Round to cents (banker's rounding) and pin the scale so stored values
/// always read back as two decimal places.
fn quantize(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp(AVG_COST_DP);
    rounded.rescale(AVG_COST_DP);
    rounded
}
