//! Yandex.Market Partner API client: OAuth token plus a campaign id, offers
//! listed per campaign.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::SyncError;
use crate::model::{MarketplaceAccount, ProductRecord};
use crate::sync::{check_response, ProductSource};

const DEFAULT_BASE_URL: &str = "https://api.partner.market.yandex.ru";
const PAGE_SIZE: usize = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct YandexMarketClient {
    http: Client,
    base_url: String,
    oauth_token: String,
    campaign_id: String,
    account_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    offers: Vec<YmOffer>,
}

#[derive(Debug, Deserialize)]
pub struct YmOffer {
    #[serde(rename = "offerId", default)]
    pub offer_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(rename = "vendorCode", default)]
    pub vendor_code: Option<String>,
    #[serde(default)]
    pub availability: String,
    #[serde(default)]
    pub price: YmPrice,
}

#[derive(Debug, Default, Deserialize)]
pub struct YmPrice {
    #[serde(default)]
    pub value: f64,
}

impl YandexMarketClient {
    pub fn new(account: &MarketplaceAccount) -> Result<Self, SyncError> {
        let oauth_token = account
            .credentials
            .api_key
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Auth("missing oauth token for yandex_market account".into()))?;
        let campaign_id = account
            .credentials
            .campaign_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Auth("missing campaign id for yandex_market account".into()))?;
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            oauth_token,
            campaign_id,
            account_id: account.id,
        })
    }

    async fn offers(&self, page: u32, page_size: usize) -> Result<Vec<YmOffer>, SyncError> {
        let resp = self
            .http
            .get(format!(
                "{}/campaigns/{}/offers",
                self.base_url, self.campaign_id
            ))
            .header("Authorization", format!("OAuth {}", self.oauth_token))
            .query(&[("page", page.to_string()), ("page_size", page_size.to_string())])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let body: OffersResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("yandex offers decode: {e}")))?;
        Ok(body.offers)
    }
}

pub fn transform_offer(offer: &YmOffer, account_id: Uuid) -> ProductRecord {
    ProductRecord {
        account_id,
        marketplace_product_id: offer.offer_id.clone(),
        name: offer.name.clone(),
        sku: offer.vendor_code.clone(),
        price: offer.price.value,
        stock: 0,
        category: offer.category.clone(),
        brand: offer.vendor.clone(),
        active: offer.availability == "ACTIVE",
    }
}

#[async_trait]
impl ProductSource for YandexMarketClient {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    async fn test_connection(&self) -> Result<(), SyncError> {
        self.offers(1, 1).await.map(|_| ())
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<ProductRecord>, SyncError> {
        let offers = self.offers(page, PAGE_SIZE).await?;
        Ok(offers
            .iter()
            .map(|o| transform_offer(o, self.account_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_gates_active_flag() {
        let mut offer = YmOffer {
            offer_id: "ym-1".into(),
            name: "Lamp".into(),
            category: Some("Home".into()),
            vendor: Some("Lumen".into()),
            vendor_code: Some("L-1".into()),
            availability: "ACTIVE".into(),
            price: YmPrice { value: 990.0 },
        };
        let rec = transform_offer(&offer, Uuid::new_v4());
        assert!(rec.active);
        assert_eq!(rec.price, 990.0);
        assert_eq!(rec.brand.as_deref(), Some("Lumen"));

        offer.availability = "DELISTED".into();
        assert!(!transform_offer(&offer, Uuid::new_v4()).active);
    }

    #[test]
    fn offers_response_decodes_with_missing_fields() {
        let body = r#"{"offers":[{"offerId":"a","name":"n","availability":"INACTIVE",
            "price":{"value":12.5,"currencyId":"RUR"}}],"paging":{}}"#;
        let parsed: OffersResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.offers.len(), 1);
        assert_eq!(parsed.offers[0].price.value, 12.5);
        assert!(parsed.offers[0].vendor_code.is_none());
    }
}
