//! Marketplace synchronization: the provider-agnostic sync service plus one
//! client per marketplace.
//!
//! Each client implements `ProductSource`; the service owns the shared
//! paginate-transform-upsert loop so providers only describe their wire
//! format and page shape.

pub mod ozon;
pub mod service;
pub mod wildberries;
pub mod yandex;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::SyncError;
use crate::model::{MarketplaceAccount, ProductRecord};

pub use service::{MarketplaceSyncService, SyncSummary};

/// Seam between the scheduler and the sync engine.
#[async_trait]
pub trait CatalogSync: Send + Sync {
    /// Full product catalog sync for one account.
    async fn sync_account_products(
        &self,
        account: &MarketplaceAccount,
    ) -> Result<SyncSummary, SyncError>;

    /// Sales/statistics sync for one account since `date_from`.
    async fn sync_account_sales(
        &self,
        account: &MarketplaceAccount,
        date_from: DateTime<Utc>,
    ) -> Result<SyncSummary, SyncError>;
}

/// One paginated upstream product listing, already mapped to the canonical
/// record shape. Pages are 1-based.
#[async_trait]
pub trait ProductSource: Send + Sync {
    fn page_size(&self) -> usize;

    /// Pause between page fetches, for providers with tight request limits.
    fn inter_page_delay(&self) -> Option<Duration> {
        None
    }

    /// Cheap credential probe, run before any pagination starts.
    async fn test_connection(&self) -> Result<(), SyncError>;

    async fn fetch_page(&self, page: u32) -> Result<Vec<ProductRecord>, SyncError>;
}

/// Map a non-2xx provider response to a typed error, folding the body text
/// into the message.
pub(crate) async fn check_response(
    resp: reqwest::Response,
) -> Result<reqwest::Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body.trim());
    Err(match status.as_u16() {
        429 => SyncError::RateLimit(message),
        401 | 403 => SyncError::Auth(message),
        _ => SyncError::from_message(message),
    })
}
