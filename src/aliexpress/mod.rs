pub mod fallback;
pub mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::config::AliExpressConfig;
pub use types::{Category, Product};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PRODUCT_FIELDS: &str = "product_id,product_title,product_url,target_sale_price,\
target_original_price,commission_rate,shop_title,product_main_image_url,shop_url,volume,\
rating,review_count,discount,evaluate_rate";

/// Where the scheduler and the admin commands get products from.
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// Trending products. Never fails: degrades to the sample catalogue.
    async fn hot_products(&self, limit: usize) -> Vec<Product>;

    /// Keyword search filtered by discount. Failures yield an empty list.
    async fn search_products(
        &self,
        keywords: &str,
        min_discount: f64,
        limit: usize,
    ) -> Vec<Product>;

    async fn product_details(&self, product_id: &str) -> Result<Option<Product>>;
}

/// Uppercase hex HMAC-SHA256 over `k=v` pairs sorted by key and joined by `&`.
pub fn sign(params: &BTreeMap<String, String>, secret: &str) -> Result<String> {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid signing key: {}", e))?;
    mac.update(query.as_bytes());

    Ok(mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect())
}

pub struct AliExpressClient {
    client: reqwest::Client,
    config: AliExpressConfig,
}

impl AliExpressClient {
    pub fn new(config: AliExpressConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn tracking_id(&self) -> &str {
        &self.config.tracking_id
    }

    /// Common parameters plus `extra`, signed.
    fn build_params(
        &self,
        method: &str,
        extra: &[(&str, String)],
        timestamp_ms: i64,
    ) -> Result<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        params.insert("app_key".to_string(), self.config.app_key.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "json".to_string());
        params.insert("v".to_string(), "2.0".to_string());
        params.insert("sign_method".to_string(), "sha256".to_string());
        params.insert("timestamp".to_string(), timestamp_ms.to_string());
        params.insert("tracking_id".to_string(), self.config.tracking_id.clone());
        for (k, v) in extra {
            params.insert(k.to_string(), v.clone());
        }

        let signature = sign(&params, &self.config.app_secret)?;
        params.insert("sign".to_string(), signature);
        Ok(params)
    }

    fn listing_params(&self, limit: usize) -> Vec<(&'static str, String)> {
        vec![
            ("fields", PRODUCT_FIELDS.to_string()),
            ("page_size", limit.to_string()),
            ("sort", "SALE_PRICE_ASC".to_string()),
            (
                "min_commission_rate",
                self.config.min_commission_rate.to_string(),
            ),
            ("platform_product_type", "ALL".to_string()),
            ("country", self.config.country.clone()),
            ("target_currency", currency_for_country(&self.config.country)),
        ]
    }

    async fn call(&self, method: &str, extra: &[(&str, String)]) -> Result<serde_json::Value> {
        let params = self.build_params(method, extra, chrono::Utc::now().timestamp_millis())?;
        let url = format!("{}/sop/rest", self.config.base_url.trim_end_matches('/'));

        debug!("Calling AliExpress method {}", method);

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("Failed to send request for {}", method))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("AliExpress API error ({}): {}", status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response for {}", method))
    }

    async fn fetch_hot(&self, limit: usize) -> Result<Vec<Product>> {
        let data = self
            .call(
                "aliexpress.affiliate.product.smartmatch",
                &self.listing_params(limit),
            )
            .await?;
        Ok(types::parse_products_response(&data, &self.config.tracking_id))
    }

    async fn fetch_search(&self, keywords: &str, limit: usize) -> Result<Vec<Product>> {
        let mut extra = vec![("keywords", keywords.to_string())];
        extra.extend(self.listing_params(limit));

        let data = self
            .call("aliexpress.affiliate.product.search", &extra)
            .await?;
        Ok(types::parse_products_response(&data, &self.config.tracking_id))
    }

    fn fallback(&self, limit: usize) -> Vec<Product> {
        info!("Using fallback mode - generating sample products");
        fallback::sample_products(&self.config.tracking_id, limit)
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        let data = self.call("aliexpress.affiliate.category.get", &[]).await?;
        Ok(types::parse_categories_response(&data))
    }

    /// True when the API answers with at least one product.
    pub async fn test_connection(&self) -> bool {
        match self.fetch_hot(1).await {
            Ok(products) => !products.is_empty(),
            Err(e) => {
                error!("AliExpress connection test failed: {:#}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ProductSource for AliExpressClient {
    async fn hot_products(&self, limit: usize) -> Vec<Product> {
        match self.fetch_hot(limit).await {
            Ok(products) if !products.is_empty() => products,
            Ok(_) => {
                warn!("Smartmatch returned no products, trying fallback...");
                self.fallback(limit)
            }
            Err(e) => {
                error!("Failed to fetch hot products: {:#}", e);
                self.fallback(limit)
            }
        }
    }

    async fn search_products(
        &self,
        keywords: &str,
        min_discount: f64,
        limit: usize,
    ) -> Vec<Product> {
        match self.fetch_search(keywords, limit).await {
            Ok(products) => types::filter_by_discount(products, min_discount),
            Err(e) => {
                error!("Search for '{}' failed: {:#}", keywords, e);
                Vec::new()
            }
        }
    }

    async fn product_details(&self, product_id: &str) -> Result<Option<Product>> {
        let extra = [
            ("product_ids", product_id.to_string()),
            ("fields", PRODUCT_FIELDS.to_string()),
            ("country", self.config.country.clone()),
        ];
        let data = self
            .call("aliexpress.affiliate.product.detail", &extra)
            .await?;
        Ok(types::parse_products_response(&data, &self.config.tracking_id)
            .into_iter()
            .next())
    }
}

fn currency_for_country(country: &str) -> String {
    match country {
        "BR" => "BRL",
        "US" => "USD",
        "MX" => "MXN",
        "ES" | "FR" | "DE" | "IT" | "PT" | "NL" => "EUR",
        "GB" => "GBP",
        _ => "USD",
    }
    .to_string()
}
