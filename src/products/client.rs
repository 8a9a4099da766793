//! Product API client.
//!
//! Calls the protected `GET /products` endpoint with a bearer credential
//! and maps the response into products or a [`FetchError`].

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, error, info, warn};
use url::Url;

use super::models::Product;
use crate::auth::Credential;
use crate::error::FetchError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Product API client.
pub struct ProductClient {
    http_client: Client,
    products_url: Url,
}

impl ProductClient {
    /// Create a new client for the given products endpoint.
    pub fn new(products_url: Url) -> Result<Self, FetchError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            products_url,
        })
    }

    /// Fetch the product list.
    ///
    /// Either every element parses or the whole call fails with
    /// [`FetchError::MalformedResponse`]; the API order is kept.
    pub async fn fetch_products(&self, credential: &Credential) -> Result<Vec<Product>, FetchError> {
        debug!("Fetching products from {}", self.products_url);

        let response = self
            .http_client
            .get(self.products_url.clone())
            .bearer_auth(credential.access_token())
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            401 | 403 => {
                warn!("Product API rejected the access token: HTTP {}", status);
                Err(FetchError::Unauthorized)
            }
            _ if status.is_success() => {
                let body = response.text().await?;
                let products = parse_products(&body)?;
                info!("Loaded {} products", products.len());
                Ok(products)
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                error!("Failed to fetch products: HTTP {} - {}", status, body);
                Err(FetchError::FetchFailed {
                    status: Some(status.as_u16()),
                    reason: status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                })
            }
        }
    }
}

/// Parse a JSON array of products, rejecting the whole body on any bad element.
pub fn parse_products(body: &str) -> Result<Vec<Product>, FetchError> {
    serde_json::from_str::<Vec<Product>>(body)
        .map_err(|e| FetchError::MalformedResponse(e.to_string()))
}
