//! sellersync: a durable background task queue and multi-marketplace catalog
//! synchronization engine.
//!
//! Tasks live in Postgres (`store::pg`) and are claimed in priority order by
//! the polling `scheduler::TaskScheduler`, which dispatches sync tasks to
//! `sync::MarketplaceSyncService` and records every attempt as a sync log.
//! Failures are classified (`errors`) and turned into user notifications and
//! remediation (`notify`). Wildberries ingestion prefers an out-of-process
//! scraper (`scraper`) with the supplier API as fallback.

pub mod errors;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod sync;

pub mod util {
    pub mod env;
}
