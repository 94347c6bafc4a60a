//! Environment-driven configuration. `.env` files are honored via dotenvy
//! before this is read.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::ledger::SellPolicy;

/// Which backend holds accounts, positions and trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub storage: StorageBackend,
    pub database_url: String,
    pub sell_policy: SellPolicy,
    pub price_refresh: Duration,
    pub jwt_secret: Vec<u8>,
}

impl Config {
    /// Read configuration from the environment:
    /// - BIND_ADDR (defaults to 0.0.0.0:3000)
    /// - STORAGE: sqlite | memory (defaults to sqlite)
    /// - DATABASE_URL (defaults to sqlite:paper_exchange.db?mode=rwc)
    /// - SELL_POLICY: strict | permissive (defaults to strict)
    /// - PRICE_REFRESH_SECS (defaults to 10)
    /// - JWT_SECRET (required)
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:3000");

        let storage = match env_or("STORAGE", "sqlite").to_lowercase().as_str() {
            "sqlite" => StorageBackend::Sqlite,
            "memory" => StorageBackend::Memory,
            other => bail!("unsupported STORAGE backend: {other}"),
        };
        let database_url = env_or("DATABASE_URL", "sqlite:paper_exchange.db?mode=rwc");

        let sell_policy = SellPolicy::parse(&env_or("SELL_POLICY", "strict"))
            .context("SELL_POLICY must be strict or permissive")?;

        let refresh_secs: u64 = env_or("PRICE_REFRESH_SECS", "10")
            .parse()
            .context("Invalid PRICE_REFRESH_SECS")?;

        let jwt_secret = std::env::var("JWT_SECRET")
            .context("JWT_SECRET not set")?
            .into_bytes();

        Ok(Self {
            bind_addr,
            storage,
            database_url,
            sell_policy,
            price_refresh: Duration::from_secs(refresh_secs),
            jwt_secret,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
