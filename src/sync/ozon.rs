//! Ozon Seller API client.
//!
//! All listing endpoints are POST with `Client-Id`/`Api-Key` headers. Prices
//! arrive as decimal strings; sellable stock is the warehouse `present`
//! count minus `reserved`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::SyncError;
use crate::model::{MarketplaceAccount, ProductRecord};
use crate::sync::{check_response, ProductSource};

const DEFAULT_BASE_URL: &str = "https://api-seller.ozon.ru";
const PAGE_SIZE: usize = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OzonClient {
    http: Client,
    base_url: String,
    client_id: String,
    api_key: String,
    account_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ProductListResponse {
    result: ProductListPage,
}

#[derive(Debug, Deserialize)]
struct ProductListPage {
    #[serde(default)]
    items: Vec<OzonProduct>,
}

#[derive(Debug, Deserialize)]
pub struct OzonProduct {
    pub product_id: i64,
    #[serde(default)]
    pub offer_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub stocks: OzonStocks,
}

#[derive(Debug, Default, Deserialize)]
pub struct OzonStocks {
    #[serde(default)]
    pub present: i32,
    #[serde(default)]
    pub reserved: i32,
}

impl OzonClient {
    pub fn new(account: &MarketplaceAccount) -> Result<Self, SyncError> {
        let client_id = account
            .credentials
            .client_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Auth("missing Client-Id for ozon account".into()))?;
        let api_key = account
            .credentials
            .api_key
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Auth("missing api key for ozon account".into()))?;
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id,
            api_key,
            account_id: account.id,
        })
    }

    async fn product_list(&self, page: u32, page_size: usize) -> Result<Vec<OzonProduct>, SyncError> {
        let resp = self
            .http
            .post(format!("{}/v2/product/list", self.base_url))
            .header("Client-Id", &self.client_id)
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "page": page,
                "page_size": page_size,
                "sort_dir": "DESC",
                "sort_by": "created_at",
            }))
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let body: ProductListResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("ozon product list decode: {e}")))?;
        Ok(body.result.items)
    }
}

pub fn transform_product(product: &OzonProduct, account_id: Uuid) -> ProductRecord {
    ProductRecord {
        account_id,
        marketplace_product_id: product.product_id.to_string(),
        name: product.name.clone(),
        sku: Some(product.offer_id.clone()),
        price: product.price.trim().parse().unwrap_or(0.0),
        stock: (product.stocks.present - product.stocks.reserved).max(0),
        category: None,
        brand: None,
        active: product.visible,
    }
}

#[async_trait]
impl ProductSource for OzonClient {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    async fn test_connection(&self) -> Result<(), SyncError> {
        self.product_list(1, 1).await.map(|_| ())
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<ProductRecord>, SyncError> {
        let items = self.product_list(page, PAGE_SIZE).await?;
        Ok(items
            .iter()
            .map(|p| transform_product(p, self.account_id))
            .collect())
    }
}
