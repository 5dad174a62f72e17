use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sellersync::scheduler::TaskScheduler;
use sellersync::scraper::CatalogScraper;
use sellersync::store::{Db, PgStore, TaskStore};
use sellersync::sync::MarketplaceSyncService;
use sellersync::util::env as env_util;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    env_util::preflight_check(
        "sync_worker",
        &["DATABASE_URL"],
        &[
            "DATABASE_URL",
            "DB_MAX_CONNECTIONS",
            "POLL_INTERVAL_SECS",
            "SCRAPER_SCRIPT",
            "AUTO_MIGRATE",
        ],
    )?;

    let db_url = env_util::db_url()?;
    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNECTIONS", 5);
    let db = Db::connect(&db_url, max_connections).await?;
    let store: Arc<dyn TaskStore> = Arc::new(PgStore::new(db));

    let scraper = CatalogScraper::from_env();
    if !scraper.is_available() {
        info!("scraper script not found; wildberries sync will use the supplier api");
    }
    let sync = Arc::new(MarketplaceSyncService::new(store.clone(), scraper));

    let poll_interval = Duration::from_secs(env_util::env_parse("POLL_INTERVAL_SECS", 30));
    let scheduler =
        Arc::new(TaskScheduler::new(store, sync).with_poll_interval(poll_interval));

    scheduler.start();
    info!("sync worker running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    scheduler.stop().await;
    Ok(())
}
