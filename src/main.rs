use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blog_aggregator::clock::SystemClock;
use blog_aggregator::config::Config;
use blog_aggregator::db::Database;
use blog_aggregator::fetcher::HttpFetcher;
use blog_aggregator::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_aggregator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("BLOG_AGGREGATOR_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} feeds from configuration {}",
        config.feeds.len(),
        config_path
    );

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_feeds(&config.feeds).await?;
    info!("Database initialized");

    let fetcher = HttpFetcher::new(
        Duration::from_secs(config.fetch_timeout_secs),
        config.max_document_bytes,
    )?;

    let scheduler = Scheduler::new(
        Arc::new(db),
        Arc::new(fetcher),
        Arc::new(SystemClock),
        config.scheduler_settings(),
    );
    info!(
        "Polling every {:?}, up to {} feeds per tick",
        scheduler.settings().tick_interval,
        scheduler.settings().batch_size
    );
    let handle = scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current tick to finish");
    handle.stop().await?;

    Ok(())
}
