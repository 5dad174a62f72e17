//! Wildberries Supplier API client.
//!
//! This is the fallback path behind the catalog scraper (see
//! `service::MarketplaceSyncService`); the public card listing sits behind
//! anti-bot protection and tight request limits, hence the small page size
//! and the pause between pages. Card prices arrive in minor units (kopecks).
//! The statistics sales feed is also served here and backs `sync_sales`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::SyncError;
use crate::model::{MarketplaceAccount, ProductRecord, SaleRecord};
use crate::sync::{check_response, ProductSource};

const DEFAULT_BASE_URL: &str = "https://suppliers-api.wildberries.ru";
const PAGE_SIZE: usize = 50;
const INTER_PAGE_DELAY: Duration = Duration::from_secs(1);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WildberriesClient {
    http: Client,
    base_url: String,
    api_key: String,
    account_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct WbCard {
    #[serde(rename = "nmID")]
    pub nm_id: i64,
    #[serde(rename = "vendorCode", default)]
    pub vendor_code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    /// Price in kopecks.
    #[serde(rename = "priceU", default)]
    pub price_u: i64,
}

#[derive(Debug, Deserialize)]
pub struct WbSale {
    #[serde(default)]
    pub date: String,
    #[serde(rename = "saleID", default)]
    pub sale_id: String,
    #[serde(rename = "nmId", default)]
    pub nm_id: i64,
    #[serde(rename = "totalPrice", default)]
    pub total_price: f64,
    #[serde(rename = "forPay", default)]
    pub for_pay: f64,
}

impl WildberriesClient {
    pub fn new(account: &MarketplaceAccount) -> Result<Self, SyncError> {
        let api_key = account
            .credentials
            .api_key
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Auth("missing api key for wildberries account".into()))?;
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            account_id: account.id,
        })
    }

    async fn cards(&self, page: u32, limit: usize) -> Result<Vec<WbCard>, SyncError> {
        let resp = self
            .http
            .get(format!("{}/content/v1/cards/cursor/list", self.base_url))
            .header("Authorization", &self.api_key)
            .query(&[("page", page.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json()
            .await
            .map_err(|e| SyncError::Validation(format!("wildberries card list decode: {e}")))
    }

    pub async fn sales(&self, date_from: DateTime<Utc>) -> Result<Vec<WbSale>, SyncError> {
        let resp = self
            .http
            .get(format!("{}/api/v3/sales", self.base_url))
            .header("Authorization", &self.api_key)
            .query(&[
                ("dateFrom", date_from.format("%Y-%m-%dT%H:%M:%S").to_string()),
                ("flag", "1".to_string()),
            ])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json()
            .await
            .map_err(|e| SyncError::Validation(format!("wildberries sales decode: {e}")))
    }
}

pub fn transform_card(card: &WbCard, account_id: Uuid) -> ProductRecord {
    ProductRecord {
        account_id,
        marketplace_product_id: card.nm_id.to_string(),
        name: card.title.clone(),
        sku: if card.vendor_code.is_empty() {
            None
        } else {
            Some(card.vendor_code.clone())
        },
        price: card.price_u as f64 / 100.0,
        // Stocks come from a separate warehouse feed; the card listing has
        // none.
        stock: 0,
        category: card.subject.clone(),
        brand: card.brand.clone(),
        active: true,
    }
}

/// Each sales row is one sold unit; the marketplace fee is the spread
/// between the buyer total and the seller payout.
pub fn transform_sale(sale: &WbSale, account_id: Uuid) -> SaleRecord {
    SaleRecord {
        account_id,
        order_id: sale.sale_id.clone(),
        marketplace_product_id: sale.nm_id.to_string(),
        quantity: 1,
        price: sale.total_price,
        commission: sale.total_price - sale.for_pay,
        net_profit: sale.for_pay,
        sale_date: parse_wb_date(&sale.date),
    }
}

// The statistics feed emits local timestamps without an offset; treat them
// as UTC. Full RFC 3339 also appears on some endpoints.
fn parse_wb_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl ProductSource for WildberriesClient {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn inter_page_delay(&self) -> Option<Duration> {
        Some(INTER_PAGE_DELAY)
    }

    async fn test_connection(&self) -> Result<(), SyncError> {
        self.cards(1, 1).await.map(|_| ())
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<ProductRecord>, SyncError> {
        let cards = self.cards(page, PAGE_SIZE).await?;
        Ok(cards
            .iter()
            .map(|c| transform_card(c, self.account_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_price_converts_from_kopecks() {
        let card = WbCard {
            nm_id: 987,
            vendor_code: "ART-9".into(),
            title: "Phone case".into(),
            brand: Some("Acme".into()),
            subject: Some("Cases".into()),
            price_u: 129_900,
        };
        let rec = transform_card(&card, Uuid::new_v4());
        assert_eq!(rec.marketplace_product_id, "987");
        assert_eq!(rec.price, 1299.0);
        assert_eq!(rec.category.as_deref(), Some("Cases"));
        assert!(rec.active);
    }

    #[test]
    fn sale_splits_commission_from_payout() {
        let sale = WbSale {
            date: "2024-03-01T10:33:09".into(),
            sale_id: "S12345".into(),
            nm_id: 987,
            total_price: 1500.0,
            for_pay: 1275.0,
        };
        let rec = transform_sale(&sale, Uuid::new_v4());
        assert_eq!(rec.order_id, "S12345");
        assert_eq!(rec.quantity, 1);
        assert_eq!(rec.commission, 225.0);
        assert_eq!(rec.net_profit, 1275.0);
        assert!(rec.sale_date.is_some());
    }

    #[test]
    fn wb_dates_parse_with_and_without_offset() {
        assert!(parse_wb_date("2024-03-01T10:33:09").is_some());
        assert!(parse_wb_date("2024-03-01T10:33:09+03:00").is_some());
        assert!(parse_wb_date("not a date").is_none());
    }
}
