//! Provider-agnostic sync driver.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::errors::{ErrorKind, SyncError};
use crate::model::{Marketplace, MarketplaceAccount, ProductRecord, TaskResult};
use crate::scraper::{CatalogScraper, ScrapeParams};
use crate::store::TaskStore;
use crate::sync::ozon::OzonClient;
use crate::sync::wildberries::{self, WildberriesClient};
use crate::sync::yandex::YandexMarketClient;
use crate::sync::{CatalogSync, ProductSource};

const DEFAULT_WB_CATALOG_URL: &str = "https://www.wildberries.ru/catalog/elektronika/telefony";
const DEFAULT_SCRAPE_LIMIT: u32 = 100;

/// Outcome of one sync run. `processed == succeeded + failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

impl From<SyncSummary> for TaskResult {
    fn from(summary: SyncSummary) -> Self {
        TaskResult {
            processed_items: summary.processed,
            success_count: summary.succeeded,
            error_count: summary.failed,
            duration_ms: summary.duration_ms,
        }
    }
}

pub struct MarketplaceSyncService {
    store: Arc<dyn TaskStore>,
    scraper: CatalogScraper,
}

impl MarketplaceSyncService {
    pub fn new(store: Arc<dyn TaskStore>, scraper: CatalogScraper) -> Self {
        Self { store, scraper }
    }

    /// Paginate the source from page 1 and upsert every item. A page fetch
    /// error aborts the run; an upsert error only counts against that item.
    async fn run_source(&self, source: &dyn ProductSource) -> Result<SyncSummary, SyncError> {
        let started = Instant::now();
        source.test_connection().await?;

        let mut summary = SyncSummary::default();
        let mut page: u32 = 1;
        loop {
            let items = source.fetch_page(page).await?;
            if items.is_empty() {
                break;
            }
            let page_len = items.len();
            self.upsert_all(&items, &mut summary).await;
            if page_len < source.page_size() {
                break;
            }
            page += 1;
            if let Some(delay) = source.inter_page_delay() {
                tokio::time::sleep(delay).await;
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    async fn upsert_all(&self, items: &[ProductRecord], summary: &mut SyncSummary) {
        for item in items {
            summary.processed += 1;
            match self.store.upsert_product(item).await {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        product = %item.marketplace_product_id,
                        error = %err,
                        "product upsert failed, continuing"
                    );
                }
            }
        }
    }

    async fn scrape_wildberries(
        &self,
        account: &MarketplaceAccount,
    ) -> Result<SyncSummary, SyncError> {
        let started = Instant::now();
        let params = ScrapeParams {
            url: account
                .catalog_url
                .clone()
                .unwrap_or_else(|| DEFAULT_WB_CATALOG_URL.to_string()),
            category: account.catalog_category.clone(),
            limit: Some(account.catalog_limit.unwrap_or(DEFAULT_SCRAPE_LIMIT)),
        };
        let rows = self.scraper.run(&params).await?;
        let records: Vec<ProductRecord> = rows.iter().map(|r| r.to_record(account.id)).collect();

        let mut summary = SyncSummary::default();
        self.upsert_all(&records, &mut summary).await;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(account = %account.id, scraped = summary.processed, "scraper catalog sync done");
        Ok(summary)
    }
}

/// Pick which error to surface when both the scraper and the API fallback
/// failed. An anti-bot block is the more actionable signal than whatever the
/// unauthenticated-card fallback produced.
fn resolve_wildberries_failure(scraper_err: SyncError, api_err: SyncError) -> SyncError {
    if scraper_err.kind() == ErrorKind::ProviderBlocked {
        scraper_err
    } else {
        api_err
    }
}

#[async_trait]
impl CatalogSync for MarketplaceSyncService {
    async fn sync_account_products(
        &self,
        account: &MarketplaceAccount,
    ) -> Result<SyncSummary, SyncError> {
        match account.marketplace {
            Marketplace::Ozon => {
                let client = OzonClient::new(account)?;
                self.run_source(&client).await
            }
            Marketplace::Wildberries => {
                // Credentials are only needed by the API fallback, but a
                // misconfigured account should fail fast either way.
                let client = WildberriesClient::new(account)?;
                if !self.scraper.is_available() {
                    return self.run_source(&client).await;
                }
                match self.scrape_wildberries(account).await {
                    Ok(summary) => Ok(summary),
                    Err(scraper_err) => {
                        warn!(
                            account = %account.id,
                            error = %scraper_err,
                            "scraper failed, falling back to supplier api"
                        );
                        match self.run_source(&client).await {
                            Ok(summary) => Ok(summary),
                            Err(api_err) => Err(resolve_wildberries_failure(scraper_err, api_err)),
                        }
                    }
                }
            }
            Marketplace::YandexMarket => {
                let client = YandexMarketClient::new(account)?;
                self.run_source(&client).await
            }
        }
    }

    async fn sync_account_sales(
        &self,
        account: &MarketplaceAccount,
        date_from: DateTime<Utc>,
    ) -> Result<SyncSummary, SyncError> {
        match account.marketplace {
            Marketplace::Wildberries => {
                let started = Instant::now();
                let client = WildberriesClient::new(account)?;
                let sales = client.sales(date_from).await?;

                let mut summary = SyncSummary::default();
                for sale in &sales {
                    let record = wildberries::transform_sale(sale, account.id);
                    summary.processed += 1;
                    match self.store.upsert_sale(&record).await {
                        Ok(()) => summary.succeeded += 1,
                        Err(err) => {
                            summary.failed += 1;
                            warn!(order = %record.order_id, error = %err, "sale upsert failed");
                        }
                    }
                }
                summary.duration_ms = started.elapsed().as_millis() as u64;
                Ok(summary)
            }
            other => Err(SyncError::Validation(format!(
                "sales sync is not available for {}",
                other.as_str()
            ))),
        }
    }
}
