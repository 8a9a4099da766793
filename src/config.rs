//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub token: TokenConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub tenant: String,
    pub authority_host: String,
    pub redirect_uri: String,
    /// Where the provider sends the browser after sign-out.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    pub sign_in_timeout_seconds: u64,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub products_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::parse(CONFIG_TOML)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without applying overrides or validation.
    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Failed to parse config.toml")
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup("AZURE_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Some(tenant) = lookup("AZURE_TENANT_ID") {
            self.oauth.tenant = tenant;
        }

        if let Some(authority_host) = lookup("AZURE_AUTHORITY_HOST") {
            self.oauth.authority_host = authority_host;
        }

        if let Some(redirect_uri) = lookup("AZURE_REDIRECT_URI") {
            self.oauth.redirect_uri = redirect_uri;
        }

        if let Some(uri) = lookup("AZURE_POST_LOGOUT_REDIRECT_URI") {
            self.oauth.post_logout_redirect_uri = Some(uri);
        }

        if let Some(products_url) = lookup("PRODUCTS_API_URL") {
            self.api.products_url = products_url;
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_AZURE_AD_CLIENT_ID" {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.is_empty() || self.oauth.tenant == "YOUR_AZURE_AD_TENANT_ID" {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        Url::parse(&self.oauth.authority_host).context("Invalid oauth.authority_host")?;
        self.redirect_port()?;
        self.products_url()?;

        Ok(())
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    /// Get the end-session URL for Azure AD.
    pub fn logout_url(&self) -> String {
        format!("{}/oauth2/v2.0/logout", self.authority())
    }

    /// Post-logout redirect, defaulting to the sign-in redirect URI.
    pub fn post_logout_redirect_uri(&self) -> &str {
        self.oauth
            .post_logout_redirect_uri
            .as_deref()
            .unwrap_or(&self.oauth.redirect_uri)
    }

    fn authority(&self) -> String {
        format!(
            "{}/{}",
            self.oauth.authority_host.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    /// Scopes requested for the product API.
    ///
    /// Falls back to the app's own `.default` scope when none are configured.
    pub fn api_scopes(&self) -> Vec<String> {
        if self.oauth.scopes.scopes.is_empty() {
            vec![format!("api://{}/.default", self.oauth.client_id)]
        } else {
            self.oauth.scopes.scopes.clone()
        }
    }

    /// Parsed product API endpoint.
    pub fn products_url(&self) -> Result<Url> {
        Url::parse(&self.api.products_url).context("Invalid api.products_url")
    }

    /// Local port the sign-in callback listener binds to.
    pub fn redirect_port(&self) -> Result<u16> {
        let url = Url::parse(&self.oauth.redirect_uri).context("Invalid oauth.redirect_uri")?;
        url.port_or_known_default()
            .context("oauth.redirect_uri has no port")
    }
}
