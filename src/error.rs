//! Error types for the product viewer.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Token cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Product API error: {0}")]
    Fetch(#[from] FetchError),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("No credential available: {0}")]
    CredentialUnavailable(String),

    #[error("Token cache error: {0}")]
    Cache(#[from] CacheError),
}

impl AuthError {
    /// True when the user aborted the sign-in rather than the provider failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }
}

/// Token cache storage errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read token cache: {0}")]
    ReadFailed(String),

    #[error("Failed to write token cache: {0}")]
    WriteFailed(String),

    #[error("Failed to delete token cache: {0}")]
    DeleteFailed(String),

    #[error("Token cache is corrupted: {0}")]
    Corrupted(String),
}

/// Product API errors.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Unauthorized: the access token was rejected")]
    Unauthorized,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("{}", fetch_failed_message(.status, .reason))]
    FetchFailed { status: Option<u16>, reason: String },
}

fn fetch_failed_message(status: &Option<u16>, reason: &str) -> String {
    match status {
        Some(status) => format!("HTTP error! Status: {}", status),
        None => format!("Network error: {}", reason),
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::FetchFailed {
            status: e.status().map(|s| s.as_u16()),
            reason: e.to_string(),
        }
    }
}

impl AppError {
    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.".to_string(),
            Self::Auth(AuthError::CallbackTimeout) => {
                "Sign-in timed out. Please try again.".to_string()
            }
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again.".to_string()
            }
            Self::Auth(AuthError::CredentialUnavailable(_)) => {
                "Session expired. Please sign in again.".to_string()
            }
            Self::Auth(e) => format!("Login failed: {}", e),
            Self::Cache(_) => "Authentication check failed.".to_string(),
            Self::Fetch(FetchError::Unauthorized) => {
                "Unauthorized. Please sign in again.".to_string()
            }
            Self::Fetch(e) => format!("Failed to load products: {}. Is your backend running?", e),
        }
    }

    /// Returns true if this error should trigger a sign-out.
    pub fn requires_sign_out(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Unauthorized))
    }
}
