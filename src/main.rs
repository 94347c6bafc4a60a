use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use paper_exchange::api::routes::{AppState, app_router};
use paper_exchange::brokerage::Brokerage;
use paper_exchange::config::{Config, StorageBackend};
use paper_exchange::feed::{self, PriceFeed};
use paper_exchange::persistence::{MemoryStore, SharedStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    let store: SharedStore = match config.storage {
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::connect(&config.database_url)
                .await
                .with_context(|| format!("failed to open {}", config.database_url))?,
        ),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let price_feed = PriceFeed::seeded();
    let brokerage = Arc::new(Brokerage::new(
        store,
        price_feed.clone(),
        config.sell_policy,
    ));
    feed::spawn_refresher(price_feed, config.price_refresh, brokerage.events());

    let state = AppState {
        brokerage,
        jwt_secret: config.jwt_secret.clone(),
    };
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        storage = ?config.storage,
        sell_policy = config.sell_policy.as_str(),
        "Listening"
    );
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
