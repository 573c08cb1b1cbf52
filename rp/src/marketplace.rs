//! Marketplace sales API
//!
//! Reads our own offers and pushes price and stock changes. The HTTP client
//! authenticates with OAuth client credentials and refreshes its bearer token
//! shortly before it expires.

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::MarketplaceConfig;
use crate::price::{CommissionRule, PriceIwtr};

/// Seconds shaved off the token lifetime so it is refreshed before expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(5);

/// Errors from the marketplace API
#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("Missing environment variable {0}")]
    MissingEnv(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Marketplace API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketplaceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            MarketplaceError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

/// Our own offer as the marketplace reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnOffer {
    pub id: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    /// Customer pay in minor units
    pub price: Money,
    #[serde(rename = "priceIWTR")]
    pub price_iwtr: Money,
    #[serde(default)]
    pub declared_stock: u32,
    #[serde(default)]
    pub min_quantity: Option<u32>,
    /// Price per marketplace unit in minor units
    pub unit_price: f64,
    pub commission_rule: CommissionRule,
}

/// Price and stock change for one offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferUpdate {
    pub offer_id: String,
    pub price: PriceIwtr,
    pub declared_stock: u32,
    pub min_quantity: Option<u32>,
}

/// Operations the repricer needs from the marketplace
pub trait Marketplace: Send + Sync {
    fn get_offer(&self, offer_id: &str) -> Result<OwnOffer, MarketplaceError>;

    fn update_offer(
        &self,
        offer_id: &str,
        price: PriceIwtr,
        declared_stock: u32,
        min_quantity: Option<u32>,
    ) -> Result<(), MarketplaceError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// HTTP client for the sales API
pub struct MarketplaceClient {
    api_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    currency: String,
    http: Client,
    token: Mutex<Option<AccessToken>>,
}

impl MarketplaceClient {
    /// Build a client, reading the OAuth client id and secret from the environment
    pub fn from_config(config: &MarketplaceConfig) -> Result<Self, MarketplaceError> {
        debug!(api_url = %config.api_url, "MarketplaceClient::from_config: called");
        let env = |name: &str| std::env::var(name).map_err(|_| MarketplaceError::MissingEnv(name.to_string()));
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: env(&config.client_id_env)?,
            client_secret: env(&config.client_secret_env)?,
            currency: config.currency.clone(),
            http,
            token: Mutex::new(None),
        })
    }

    fn offer_url(&self, offer_id: &str) -> String {
        format!("{}/api/v1/offers/{}", self.api_url, offer_id)
    }

    /// Current bearer token, refreshing it when missing or about to expire
    fn bearer(&self) -> Result<String, MarketplaceError> {
        let mut token = self.token.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(current) = token.as_ref()
            && Instant::now() < current.expires_at
        {
            return Ok(current.value.clone());
        }

        info!("Refreshing marketplace token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MarketplaceError::Auth(format!("{}: {}", status, body)));
        }

        let payload: TokenResponse = response.json()?;
        let lifetime = Duration::from_secs(payload.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let fresh = AccessToken {
            value: payload.access_token,
            expires_at: Instant::now() + lifetime,
        };
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, MarketplaceError> {
        let response = request.bearer_auth(self.bearer()?).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().unwrap_or_default();
        error!(%status, %message, "Marketplace API error");
        Err(MarketplaceError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn update_body(&self, price: PriceIwtr, declared_stock: u32, min_quantity: Option<u32>) -> serde_json::Value {
        let money = Money {
            amount: price.0,
            currency: self.currency.clone(),
        };
        let mut body = serde_json::json!({
            "price": money,
            "declaredStock": declared_stock,
        });
        if let Some(min_quantity) = min_quantity {
            body["minQuantity"] = serde_json::json!(min_quantity);
        }
        body
    }
}

impl Marketplace for MarketplaceClient {
    fn get_offer(&self, offer_id: &str) -> Result<OwnOffer, MarketplaceError> {
        debug!(%offer_id, "get_offer: called");
        let response = self.send(self.http.get(self.offer_url(offer_id)))?;
        Ok(response.json()?)
    }

    fn update_offer(
        &self,
        offer_id: &str,
        price: PriceIwtr,
        declared_stock: u32,
        min_quantity: Option<u32>,
    ) -> Result<(), MarketplaceError> {
        debug!(%offer_id, price = price.0, declared_stock, ?min_quantity, "update_offer: called");
        let body = self.update_body(price, declared_stock, min_quantity);
        self.send(self.http.patch(self.offer_url(offer_id)).json(&body))?;
        info!(%offer_id, price = %price, declared_stock, "Offer updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MarketplaceClient {
        MarketplaceClient {
            api_url: "https://api.test".to_string(),
            token_url: "https://id.test/token".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            currency: "EUR".to_string(),
            http: Client::new(),
            token: Mutex::new(None),
        }
    }

    #[test]
    fn test_own_offer_deserialize() {
        let json = r#"{
            "id": "abc", "productId": "p1", "name": "Gold", "sellerId": 9, "status": "ACTIVE",
            "priceIWTR": {"amount": 1000, "currency": "EUR"},
            "price": {"amount": 1130, "currency": "EUR"},
            "declaredStock": 5, "minQuantity": null, "unitPrice": 565,
            "commissionRule": {"id": "r", "ruleName": "std", "fixedAmount": 30, "percentValue": 10}
        }"#;
        let offer: OwnOffer = serde_json::from_str(json).unwrap();
        assert_eq!(offer.price_iwtr.amount, 1000);
        assert_eq!(offer.unit_price, 565.0);
        assert_eq!(offer.commission_rule, CommissionRule { id: "r".into(), rule_name: "std".into(), fixed_amount: 30, percent_value: 10 });
    }

    #[test]
    fn test_update_body() {
        let client = client();
        let body = client.update_body(PriceIwtr(1234), 14, Some(6));
        assert_eq!(body["price"]["amount"], 1234);
        assert_eq!(body["price"]["currency"], "EUR");
        assert_eq!(body["declaredStock"], 14);
        assert_eq!(body["minQuantity"], 6);

        let body = client.update_body(PriceIwtr(1), 0, None);
        assert!(body.get("minQuantity").is_none());
    }

    #[test]
    fn test_offer_url() {
        assert_eq!(client().offer_url("abc"), "https://api.test/api/v1/offers/abc");
    }

    #[test]
    fn test_from_config_requires_env() {
        let config = MarketplaceConfig {
            client_id_env: "REPRICER_TEST_MISSING_ID".to_string(),
            ..MarketplaceConfig::default()
        };
        assert!(matches!(
            MarketplaceClient::from_config(&config),
            Err(MarketplaceError::MissingEnv(name)) if name == "REPRICER_TEST_MISSING_ID"
        ));
    }

    #[test]
    fn test_error_status() {
        let err = MarketplaceError::Api {
            status: 404,
            message: "no such offer".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "Marketplace API error (404): no such offer");
    }
}
