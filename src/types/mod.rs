//! Domain model: accounts, positions, trade records.

pub mod account;
pub mod position;
pub mod trade;
