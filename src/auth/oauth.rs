//! Azure AD v2 endpoints: authorization code + PKCE and the refresh grant.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::Config;
use crate::error::AuthError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Added to every interactive request so an ID and refresh token come back.
const OIDC_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// URL-safe random string from `len` random bytes.
fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE code verifier and its S256 challenge.
#[derive(Debug)]
pub struct PkceChallenge {
    /// Kept locally and sent with the code redemption.
    pub verifier: String,
    /// BASE64URL(SHA256(verifier)), sent with the authorize request.
    pub challenge: String,
}

impl PkceChallenge {
    pub fn new() -> Self {
        let verifier = random_token(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Grant redeemed at the token endpoint.
enum Grant<'a> {
    AuthorizationCode { code: &'a str, verifier: &'a str },
    RefreshToken(&'a str),
}

impl Grant<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken(_) => "refresh_token",
        }
    }

    fn failure(&self, reason: String) -> AuthError {
        match self {
            Self::AuthorizationCode { .. } => AuthError::TokenExchangeFailed(reason),
            Self::RefreshToken(_) => AuthError::TokenRefreshFailed(reason),
        }
    }
}

/// Client for one Azure AD tenant and app registration.
pub struct OAuth2Client {
    client_id: String,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    authorize_endpoint: Url,
    token_endpoint: Url,
    logout_endpoint: Url,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            post_logout_redirect_uri: config.post_logout_redirect_uri().to_string(),
            authorize_endpoint: Url::parse(&config.auth_url())
                .context("Invalid authorize endpoint")?,
            token_endpoint: Url::parse(&config.token_url()).context("Invalid token endpoint")?,
            logout_endpoint: Url::parse(&config.logout_url())
                .context("Invalid logout endpoint")?,
            http_client,
        })
    }

    /// Build the browser authorize URL.
    ///
    /// Returns the URL together with the `state` value the callback must echo.
    pub fn generate_auth_url(&self, pkce: &PkceChallenge, scopes: &[String]) -> (Url, String) {
        let state = random_token(16);
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &with_extra_scopes(scopes, &OIDC_SCOPES))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        (url, state)
    }

    /// End-session URL that also signs the user out at the provider.
    pub fn logout_url(&self) -> Url {
        let mut url = self.logout_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", &self.post_logout_redirect_uri);
        url
    }

    /// Redeem an authorization code from the callback.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let grant = Grant::AuthorizationCode {
            code,
            verifier: pkce_verifier,
        };
        self.request_token(grant, &with_extra_scopes(scopes, &OIDC_SCOPES))
            .await
    }

    /// Redeem a refresh token for an access token covering `scopes`.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let grant = Grant::RefreshToken(refresh_token);
        self.request_token(grant, &with_extra_scopes(scopes, &["offline_access"]))
            .await
    }

    async fn request_token(&self, grant: Grant<'_>, scope: &str) -> Result<TokenResponse, AuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", grant.name()),
            ("scope", scope),
        ];
        match &grant {
            Grant::AuthorizationCode { code, verifier } => {
                form.push(("code", *code));
                form.push(("code_verifier", *verifier));
                form.push(("redirect_uri", self.redirect_uri.as_str()));
            }
            Grant::RefreshToken(token) => form.push(("refresh_token", *token)),
        }

        debug!("Token request ({}) for scopes: {}", grant.name(), scope);
        let response = self
            .http_client
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| grant.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Provider error body stays in the log
            let body = response.text().await.unwrap_or_default();
            match grant {
                Grant::AuthorizationCode { .. } => {
                    error!("Code redemption failed: HTTP {} - {}", status, body)
                }
                Grant::RefreshToken(_) => warn!("Refresh grant failed: HTTP {} - {}", status, body),
            }
            return Err(grant.failure(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| grant.failure(e.to_string()))
    }
}

/// `scopes` followed by any of `extra` not already present.
fn with_extra_scopes(scopes: &[String], extra: &[&str]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    for &scope in extra {
        if !all.contains(&scope) {
            all.push(scope);
        }
    }
    all.join(" ")
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Extract `code` and `state` from the redirect the provider sent back.
///
/// `error=access_denied` means the user declined and maps to
/// [`AuthError::UserCancelled`].
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.remove("error") {
        if error == "access_denied" {
            return Err(AuthError::UserCancelled);
        }
        let description = params.remove("error_description").unwrap_or(error);
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params.remove("code").ok_or(AuthError::InvalidAuthCode)?;
    let state = params
        .remove("state")
        .ok_or(AuthError::StateValidationFailed)?;
    Ok((code, state))
}
