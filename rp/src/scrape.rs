//! Competitor listings
//!
//! Marketplace pages embed their data as a JSON object assigned to
//! `window._preloadedState`. A page is either an offer listing (one product,
//! many sellers) or a category listing (many products, each with its own
//! offer page).

use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ScraperConfig;

static STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"window\._preloadedState\s*=\s*").expect("state pattern is valid"));

/// Errors from fetching or reading a listing page
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Failed to fetch {url}: {message}")]
    Http { url: String, message: String },

    #[error("No preloaded state found at {0}")]
    MissingState(String),

    #[error("Cannot extract offers or products from {0}")]
    Unrecognized(String),

    #[error("Invalid preloaded state: {0}")]
    Json(#[from] serde_json::Error),
}

/// One competitor offer
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorOffer {
    pub offer_id: String,
    pub product_id: String,
    pub seller: String,
    /// Customer pay in minor units
    pub price: i64,
    /// Price per marketplace unit in minor units
    pub unit_price: f64,
}

/// One product of a category listing
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryProduct {
    pub product_id: String,
    pub external_id: String,
    pub url_key: String,
    /// Calculated price in minor units
    pub price: i64,
    /// Price per marketplace unit in minor units
    pub unit_price: f64,
}

impl CategoryProduct {
    /// URL of the product's own offer page
    pub fn page_url(&self, base_url: &str) -> String {
        format!("{}/{}/{}", base_url.trim_end_matches('/'), self.external_id, self.url_key)
    }
}

/// What a listing page contains
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    Offers(Vec<CompetitorOffer>),
    Products(Vec<CategoryProduct>),
}

/// Source of competitor listings
pub trait Scraper: Send + Sync {
    fn fetch_listing(&self, url: &str) -> Result<Listing, ScrapeError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOffer {
    id: String,
    #[serde(default)]
    product_id: String,
    price: RawAmount,
    unit_price: Option<f64>,
    seller: RawSeller,
}

#[derive(Debug, Deserialize)]
struct RawAmount {
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct RawSeller {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    id: String,
    external_id: String,
    price: RawProductPrice,
    attributes: RawAttributes,
    ingame_attributes: Option<RawIngameAttributes>,
}

#[derive(Debug, Deserialize)]
struct RawProductPrice {
    calculated: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttributes {
    url_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIngameAttributes {
    unit_price: f64,
}

impl From<RawOffer> for CompetitorOffer {
    fn from(raw: RawOffer) -> Self {
        Self {
            unit_price: raw.unit_price.unwrap_or(raw.price.amount as f64),
            offer_id: raw.id,
            product_id: raw.product_id,
            seller: raw.seller.name,
            price: raw.price.amount,
        }
    }
}

impl From<RawProduct> for CategoryProduct {
    fn from(raw: RawProduct) -> Self {
        Self {
            unit_price: raw
                .ingame_attributes
                .map(|a| a.unit_price)
                .unwrap_or(raw.price.calculated as f64),
            product_id: raw.id,
            external_id: raw.external_id,
            url_key: raw.attributes.url_key,
            price: raw.price.calculated,
        }
    }
}

/// Pull the preloaded state object out of a page
pub fn parse_state(html: &str) -> Option<Result<serde_json::Value, ScrapeError>> {
    let start = STATE_RE.find(html)?.end();
    let mut stream = serde_json::Deserializer::from_str(&html[start..]).into_iter::<serde_json::Value>();
    Some(stream.next()?.map_err(ScrapeError::from))
}

fn extract_offers(state: &serde_json::Value) -> Option<Result<Vec<CompetitorOffer>, ScrapeError>> {
    let offers = state.get("offers")?;
    let main = offers.get("mainOffer")?;
    let collection = offers.get("collection").and_then(|c| c.as_array()).cloned().unwrap_or_default();

    let parse = || -> Result<Vec<CompetitorOffer>, ScrapeError> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for value in std::iter::once(main.clone()).chain(collection) {
            let offer: CompetitorOffer = serde_json::from_value::<RawOffer>(value)?.into();
            if seen.insert(offer.offer_id.clone()) {
                result.push(offer);
            }
        }
        Ok(result)
    };
    Some(parse())
}

fn extract_products(state: &serde_json::Value) -> Option<Result<Vec<CategoryProduct>, ScrapeError>> {
    let list = state.get("ingameCategory")?.get("finalProducts")?.get("list")?.as_array()?;
    let parse = || -> Result<Vec<CategoryProduct>, ScrapeError> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for value in list {
            let product: CategoryProduct = serde_json::from_value::<RawProduct>(value.clone())?.into();
            if seen.insert(product.product_id.clone()) {
                result.push(product);
            }
        }
        Ok(result)
    };
    Some(parse())
}

/// Classify a preloaded state as an offer or a category listing
pub fn extract_listing(url: &str, state: &serde_json::Value) -> Result<Listing, ScrapeError> {
    match extract_offers(state) {
        Some(Ok(offers)) => return Ok(Listing::Offers(offers)),
        Some(Err(e)) => debug!(%url, error = %e, "extract_listing: offers present but unreadable"),
        None => {}
    }
    match extract_products(state) {
        Some(Ok(products)) => return Ok(Listing::Products(products)),
        Some(Err(e)) => debug!(%url, error = %e, "extract_listing: products present but unreadable"),
        None => {}
    }
    Err(ScrapeError::Unrecognized(url.to_string()))
}

/// Parse a full page into a listing
pub fn listing_from_html(url: &str, html: &str) -> Result<Listing, ScrapeError> {
    let state = parse_state(html).ok_or_else(|| ScrapeError::MissingState(url.to_string()))??;
    extract_listing(url, &state)
}

/// Fetches listing pages over HTTP
pub struct HttpScraper {
    http: Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpScraper {
    pub fn from_config(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        debug!(?config, "HttpScraper::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ScrapeError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn fetch_once(&self, url: &str) -> Result<Listing, ScrapeError> {
        let http_error = |message: String| ScrapeError::Http {
            url: url.to_string(),
            message,
        };
        let response = self.http.get(url).send().map_err(|e| http_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(http_error(format!("HTTP error: {}", response.status())));
        }
        let html = response.text().map_err(|e| http_error(e.to_string()))?;
        listing_from_html(url, &html)
    }
}

impl Scraper for HttpScraper {
    fn fetch_listing(&self, url: &str) -> Result<Listing, ScrapeError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url) {
                Ok(listing) => return Ok(listing),
                // Classification failures do not get better on retry
                Err(e @ ScrapeError::Unrecognized(_)) => return Err(e),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(%url, attempt, error = %e, "Listing fetch failed, retrying");
                    thread::sleep(self.retry_delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFERS_PAGE: &str = r#"<html><script>
window._preloadedState = {"offers": {
  "mainOffer": {"id": "o1", "productId": "p1", "price": {"amount": 1500, "currency": "EUR"}, "unitPrice": 1500, "seller": {"id": 1, "name": "alpha"}},
  "collection": [
    {"id": "o1", "productId": "p1", "price": {"amount": 1500, "currency": "EUR"}, "seller": {"id": 1, "name": "alpha"}},
    {"id": "o2", "productId": "p1", "price": {"amount": 1400, "currency": "EUR"}, "seller": {"id": 2, "name": "beta"}}
  ]}};
</script></html>"#;

    const CATEGORY_PAGE: &str = r#"<script>window._preloadedState={"ingameCategory": {"finalProducts": {"list": [
  {"id": "fp1", "offerId": "x", "externalId": "123", "price": {"calculated": 900, "lowestOffer": 850}, "attributes": {"urlKey": "gold-1k"}, "ingameAttributes": {"unitPrice": 0.9}},
  {"id": "fp2", "offerId": "y", "externalId": "456", "price": {"calculated": 1200, "lowestOffer": 1100}, "attributes": {"urlKey": "gold-2k"}}
]}}}</script>"#;

    #[test]
    fn test_offers_page() {
        let listing = listing_from_html("u", OFFERS_PAGE).unwrap();
        let Listing::Offers(offers) = listing else {
            panic!("expected offers");
        };
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].offer_id, "o1");
        assert_eq!(offers[1].seller, "beta");
        // Missing unitPrice falls back to the price
        assert_eq!(offers[1].unit_price, 1400.0);
    }

    #[test]
    fn test_category_page() {
        let listing = listing_from_html("u", CATEGORY_PAGE).unwrap();
        let Listing::Products(products) = listing else {
            panic!("expected products");
        };
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].unit_price, 0.9);
        assert_eq!(products[1].unit_price, 1200.0);
        assert_eq!(products[0].page_url("https://m.test/category/"), "https://m.test/category/123/gold-1k");
    }

    #[test]
    fn test_missing_state() {
        assert!(matches!(listing_from_html("u", "<html></html>"), Err(ScrapeError::MissingState(_))));
    }

    #[test]
    fn test_unrecognized_state() {
        let html = r#"window._preloadedState = {"something": "else"}"#;
        assert!(matches!(listing_from_html("u", html), Err(ScrapeError::Unrecognized(_))));
    }

    #[test]
    fn test_broken_json() {
        let html = r#"window._preloadedState = {"offers": "#;
        assert!(matches!(listing_from_html("u", html), Err(ScrapeError::Json(_))));
    }
}
