//! Paper-trading exchange: accounts, a simulated price feed, and a
//! position ledger with weighted-average cost accounting over pluggable
//! storage backends.

pub mod api;
pub mod brokerage;
pub mod config;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod persistence;
pub mod types;
