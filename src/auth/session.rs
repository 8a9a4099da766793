//! Session manager: identity lifecycle and credential acquisition.
//!
//! Owns the signed-in identity and the in-memory access tokens. Silent
//! acquisition is tried first (memory, then the refresh token from the
//! token cache); the interactive browser flow is the fallback.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use url::Url;

use super::credential::{AuthenticatedSession, Credential};
use super::identity::Identity;
use super::interactive::InteractiveAuthenticator;
use super::oauth::{parse_callback_url, OAuth2Client, PkceChallenge, TokenResponse};
use crate::cache::{CachedAccount, SecureString, TokenCache};
use crate::error::{AuthError, CacheError};

/// Identity lifecycle and token acquisition for one user at a time.
pub struct SessionManager<A, C> {
    oauth_client: OAuth2Client,
    authenticator: A,
    cache: C,
    scopes: Vec<String>,
    refresh_window: Duration,
    credentials: Vec<Credential>,
}

impl<A, C> SessionManager<A, C>
where
    A: InteractiveAuthenticator,
    C: TokenCache,
{
    /// Create a session manager requesting `scopes` for sign-in.
    ///
    /// Cached access tokens are renewed once they are within
    /// `refresh_window` of expiry.
    pub fn new(
        oauth_client: OAuth2Client,
        authenticator: A,
        cache: C,
        scopes: Vec<String>,
        refresh_window: Duration,
    ) -> Self {
        Self {
            oauth_client,
            authenticator,
            cache,
            scopes,
            refresh_window,
            credentials: Vec::new(),
        }
    }

    /// Scopes requested on sign-in.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Provider end-session URL for signing out of the browser session too.
    pub fn logout_url(&self) -> Url {
        self.oauth_client.logout_url()
    }

    /// Return the first cached identity without prompting the user.
    pub fn check_existing_session(&self) -> Result<Option<Identity>, CacheError> {
        let accounts = self.cache.accounts()?;
        if accounts.len() > 1 {
            debug!("{} cached accounts, using the first", accounts.len());
        }
        Ok(accounts.into_iter().next().map(|a| a.identity))
    }

    /// Sign in through the browser and remember the new identity.
    pub async fn interactive_sign_in(&mut self) -> Result<Identity, AuthError> {
        let scopes = self.scopes.clone();
        let session = self.sign_in_with_scopes(&scopes).await?;
        Ok(session.identity)
    }

    /// Get a credential for `identity` covering `scopes`.
    ///
    /// Fails with [`AuthError::CredentialUnavailable`] when neither silent
    /// nor interactive acquisition succeeds.
    pub async fn get_credential(
        &mut self,
        identity: &Identity,
        scopes: &[String],
    ) -> Result<Credential, AuthError> {
        match self.acquire_silent(identity, scopes).await {
            Ok(credential) => return Ok(credential),
            Err(e) => info!("Silent token acquisition failed, falling back to sign-in: {}", e),
        }

        match self.sign_in_with_scopes(scopes).await {
            Ok(session) if session.identity == *identity => Ok(session.credential),
            Ok(session) => {
                warn!(
                    "Interactive sign-in returned {} instead of {}",
                    session.identity.username, identity.username
                );
                Err(AuthError::CredentialUnavailable(
                    "signed in as a different account".into(),
                ))
            }
            Err(e) => Err(AuthError::CredentialUnavailable(e.to_string())),
        }
    }

    /// Forget every identity and credential.
    pub fn sign_out(&mut self) -> Result<(), CacheError> {
        self.credentials.clear();
        self.cache.clear()?;
        info!("Signed out, token cache cleared");
        Ok(())
    }

    /// Obtain a credential without user interaction.
    pub async fn acquire_silent(
        &mut self,
        identity: &Identity,
        scopes: &[String],
    ) -> Result<Credential, AuthError> {
        if let Some(credential) = self.credentials.iter().find(|c| c.matches(identity, scopes)) {
            if !credential.expires_within(self.refresh_window, Utc::now()) {
                debug!("Using cached access token for {}", identity.username);
                return Ok(credential.clone());
            }
            debug!("Cached access token for {} is expiring", identity.username);
        }

        let account = self
            .cache
            .account(&identity.home_account_id)?
            .ok_or_else(|| AuthError::CredentialUnavailable("account not in cache".into()))?;
        let refresh_token = account
            .refresh_token
            .ok_or_else(|| AuthError::CredentialUnavailable("no refresh token".into()))?;

        let response = self
            .oauth_client
            .refresh_token(refresh_token.as_str(), scopes)
            .await?;

        let credential = self.remember(identity, scopes, &response)?;
        if let Some(new_refresh) = &response.refresh_token {
            self.cache.store(CachedAccount::new(
                identity.clone(),
                Some(SecureString::from(new_refresh.as_str())),
            ))?;
        }

        info!(
            "Token refreshed for {}, expires at {}",
            identity.username,
            credential.expires_at()
        );
        Ok(credential)
    }

    async fn sign_in_with_scopes(
        &mut self,
        scopes: &[String],
    ) -> Result<AuthenticatedSession, AuthError> {
        let pkce = PkceChallenge::new();
        let (auth_url, expected_state) = self.oauth_client.generate_auth_url(&pkce, scopes);

        let callback_url = self.authenticator.authorize(&auth_url).await?;
        let (code, state) = parse_callback_url(&callback_url)?;
        if state != expected_state {
            return Err(AuthError::StateValidationFailed);
        }

        let response = self
            .oauth_client
            .exchange_code(&code, &pkce.verifier, scopes)
            .await?;

        let id_token = response
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::InvalidIdToken("token response has no id_token".into()))?;
        let identity = Identity::from_id_token(id_token)?;
        let credential = self.remember(&identity, scopes, &response)?;

        let refresh_token = match &response.refresh_token {
            Some(rt) => Some(SecureString::from(rt.as_str())),
            // Keep the previous refresh token when the provider omits one
            None => self
                .cache
                .account(&identity.home_account_id)?
                .and_then(|a| a.refresh_token),
        };
        self.cache
            .store(CachedAccount::new(identity.clone(), refresh_token))?;
        info!("Sign-in successful: {}", identity.display_name());

        Ok(AuthenticatedSession {
            identity,
            credential,
        })
    }

    fn remember(
        &mut self,
        identity: &Identity,
        scopes: &[String],
        response: &TokenResponse,
    ) -> Result<Credential, AuthError> {
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::TokenExchangeFailed(format!(
                    "expires_in out of range: {}",
                    response.expires_in
                ))
            })?;
        let credential = Credential::new(
            identity,
            scopes,
            response.access_token.as_str(),
            expires_at,
        );
        self.credentials.retain(|c| !c.matches(identity, scopes));
        self.credentials.push(credential.clone());
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::fake_id_token;
    use crate::cache::MemoryTokenCache;
    use crate::config::Config;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers the authorize request the way the provider would redirect.
    #[derive(Clone, Default)]
    struct ScriptedSignIn {
        calls: Arc<AtomicUsize>,
        cancel: bool,
        tamper_state: bool,
    }

    #[async_trait]
    impl InteractiveAuthenticator for ScriptedSignIn {
        async fn authorize(&self, authorize_url: &Url) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel {
                return Err(AuthError::UserCancelled);
            }
            let params: HashMap<_, _> = authorize_url.query_pairs().into_owned().collect();
            let state = if self.tamper_state {
                "forged".to_string()
            } else {
                params["state"].clone()
            };
            Ok(format!(
                "http://localhost:28491/callback?code=auth-code&state={}",
                state
            ))
        }
    }

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::parse(include_str!("../../config.toml")).unwrap();
        config.oauth.client_id = "client".into();
        config.oauth.tenant = "tenant".into();
        config.oauth.authority_host = server.uri();
        config
    }

    fn id_token() -> String {
        fake_id_token(&json!({
            "sub": "s",
            "oid": "user",
            "tid": "tenant",
            "preferred_username": "ada@contoso.com",
            "name": "Ada"
        }))
    }

    fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
        let mut body = json!({
            "access_token": access,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "id_token": id_token(),
        });
        if let Some(rt) = refresh {
            body["refresh_token"] = json!(rt);
        }
        body
    }

    fn manager(
        server: &MockServer,
        sign_in: ScriptedSignIn,
        cache: MemoryTokenCache,
    ) -> SessionManager<ScriptedSignIn, MemoryTokenCache> {
        let config = config_for(server);
        SessionManager::new(
            OAuth2Client::new(&config).unwrap(),
            sign_in,
            cache,
            config.api_scopes(),
            Duration::minutes(5),
        )
    }

    fn cached_user() -> CachedAccount {
        CachedAccount::new(
            Identity::new("user.tenant", "ada@contoso.com"),
            Some("cached-refresh".into()),
        )
    }

    #[tokio::test]
    async fn test_check_existing_session_then_sign_out() {
        let server = MockServer::start().await;
        let mut session = manager(
            &server,
            ScriptedSignIn::default(),
            MemoryTokenCache::with_accounts(vec![cached_user()]),
        );

        let identity = session.check_existing_session().unwrap();
        assert_eq!(identity.unwrap().username, "ada@contoso.com");

        session.sign_out().unwrap();
        assert!(session.check_existing_session().unwrap().is_none());
        assert_eq!(
            session.logout_url().as_str(),
            format!(
                "{}/tenant/oauth2/v2.0/logout?post_logout_redirect_uri=http%3A%2F%2Flocalhost%3A28491%2Fcallback",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_interactive_sign_in_caches_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("at-1", Some("rt-1"), 3600)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut session = manager(&server, ScriptedSignIn::default(), MemoryTokenCache::new());
        let identity = session.interactive_sign_in().await.unwrap();

        assert_eq!(identity.home_account_id, "user.tenant");
        assert_eq!(identity.display_name(), "Ada");
        assert_eq!(session.check_existing_session().unwrap(), Some(identity.clone()));

        // The sign-in token is reused without another round trip
        let scopes = session.scopes().to_vec();
        let credential = session.get_credential(&identity, &scopes).await.unwrap();
        assert_eq!(credential.access_token(), "at-1");
    }

    #[tokio::test]
    async fn test_get_credential_refreshes_silently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=cached-refresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("at-2", Some("rt-2"), 3600)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sign_in = ScriptedSignIn::default();
        let calls = Arc::clone(&sign_in.calls);
        let cache = MemoryTokenCache::with_accounts(vec![cached_user()]);
        let mut session = manager(&server, sign_in, cache);

        let identity = session.check_existing_session().unwrap().unwrap();
        let scopes = session.scopes().to_vec();
        let credential = session.get_credential(&identity, &scopes).await.unwrap();

        assert_eq!(credential.access_token(), "at-2");
        assert_eq!(credential.home_account_id(), "user.tenant");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Rotated refresh token is cached
        let account = session.cache.account("user.tenant").unwrap().unwrap();
        assert_eq!(account.refresh_token.unwrap().as_str(), "rt-2");

        // Second call is served from memory (the mock expects one hit)
        session.get_credential(&identity, &scopes).await.unwrap();
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("short", None, 60)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let cache = MemoryTokenCache::with_accounts(vec![cached_user()]);
        let mut session = manager(&server, ScriptedSignIn::default(), cache);
        let identity = session.check_existing_session().unwrap().unwrap();
        let scopes = session.scopes().to_vec();

        // 60s lifetime is inside the 5 minute refresh window
        session.get_credential(&identity, &scopes).await.unwrap();
        session.get_credential(&identity, &scopes).await.unwrap();

        // Refresh token kept when the provider does not rotate it
        let account = session.cache.account("user.tenant").unwrap().unwrap();
        assert_eq!(account.refresh_token.unwrap().as_str(), "cached-refresh");
    }

    #[tokio::test]
    async fn test_falls_back_to_interactive_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("at-3", Some("rt-3"), 3600)),
            )
            .mount(&server)
            .await;

        let sign_in = ScriptedSignIn::default();
        let calls = Arc::clone(&sign_in.calls);
        let cache = MemoryTokenCache::with_accounts(vec![cached_user()]);
        let mut session = manager(&server, sign_in, cache);

        let identity = session.check_existing_session().unwrap().unwrap();
        let scopes = session.scopes().to_vec();
        let credential = session.get_credential(&identity, &scopes).await.unwrap();

        assert_eq!(credential.access_token(), "at-3");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_credential_unavailable_when_all_paths_fail() {
        let server = MockServer::start().await;
        let sign_in = ScriptedSignIn {
            cancel: true,
            ..Default::default()
        };
        let mut session = manager(&server, sign_in, MemoryTokenCache::new());

        let identity = Identity::new("user.tenant", "ada@contoso.com");
        let scopes = session.scopes().to_vec();
        let result = session.get_credential(&identity, &scopes).await;
        assert!(matches!(result, Err(AuthError::CredentialUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cancelled_sign_in() {
        let server = MockServer::start().await;
        let sign_in = ScriptedSignIn {
            cancel: true,
            ..Default::default()
        };
        let mut session = manager(&server, sign_in, MemoryTokenCache::new());

        let result = session.interactive_sign_in().await;
        assert!(matches!(result, Err(AuthError::UserCancelled)));
        assert!(session.check_existing_session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected() {
        let server = MockServer::start().await;
        let sign_in = ScriptedSignIn {
            tamper_state: true,
            ..Default::default()
        };
        let mut session = manager(&server, sign_in, MemoryTokenCache::new());

        let result = session.interactive_sign_in().await;
        assert!(matches!(result, Err(AuthError::StateValidationFailed)));
    }

    #[tokio::test]
    async fn test_token_endpoint_error_is_provider_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut session = manager(&server, ScriptedSignIn::default(), MemoryTokenCache::new());
        let result = session.interactive_sign_in().await;
        assert!(matches!(result, Err(AuthError::TokenExchangeFailed(_))));
    }

    #[tokio::test]
    async fn test_interactive_fallback_rejects_other_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("at-ada", Some("rt"), 3600)),
            )
            .mount(&server)
            .await;

        let sign_in = ScriptedSignIn::default();
        let calls = Arc::clone(&sign_in.calls);
        let mut session = manager(&server, sign_in, MemoryTokenCache::new());

        // The browser comes back as Ada, not the identity that was asked for
        let grace = Identity::new("grace.tenant", "grace@contoso.com");
        let scopes = session.scopes().to_vec();
        let result = session.get_credential(&grace, &scopes).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(AuthError::CredentialUnavailable(reason)) => {
                assert_eq!(reason, "signed in as a different account")
            }
            other => panic!("expected CredentialUnavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("at", Some("rt"), u64::MAX)),
            )
            .mount(&server)
            .await;

        let mut session = manager(&server, ScriptedSignIn::default(), MemoryTokenCache::new());
        let result = session.interactive_sign_in().await;

        assert!(matches!(result, Err(AuthError::TokenExchangeFailed(_))));
        assert!(session.check_existing_session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_drops_memory_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("at-1", Some("rt-1"), 3600)),
            )
            .mount(&server)
            .await;

        let mut session = manager(&server, ScriptedSignIn::default(), MemoryTokenCache::new());
        let identity = session.interactive_sign_in().await.unwrap();
        session.sign_out().unwrap();

        let scopes = session.scopes().to_vec();
        let result = session.acquire_silent(&identity, &scopes).await;
        assert!(matches!(result, Err(AuthError::CredentialUnavailable(_))));
    }
}
