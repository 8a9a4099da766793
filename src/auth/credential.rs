//! Access credentials and the signed-in session record.

use chrono::{DateTime, Duration, Utc};

use super::identity::Identity;
use crate::cache::SecureString;

/// Short-lived access token bound to an identity and a scope set.
#[derive(Debug, Clone)]
pub struct Credential {
    home_account_id: String,
    scopes: Vec<String>,
    access_token: SecureString,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        identity: &Identity,
        scopes: &[String],
        access_token: impl Into<SecureString>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            home_account_id: identity.home_account_id.clone(),
            scopes: normalize_scopes(scopes),
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Account the token was issued for.
    pub fn home_account_id(&self) -> &str {
        &self.home_account_id
    }

    /// Raw token for the `Authorization: Bearer` header.
    pub fn access_token(&self) -> &str {
        self.access_token.as_str()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True once `now` is within `window` of the expiry.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - window <= now
    }

    /// True if the credential was issued for this identity and covers the scopes.
    pub fn matches(&self, identity: &Identity, scopes: &[String]) -> bool {
        self.home_account_id == identity.home_account_id && self.scopes == normalize_scopes(scopes)
    }
}

/// Sorted, de-duplicated scope list used as a cache key.
pub fn normalize_scopes(scopes: &[String]) -> Vec<String> {
    let mut scopes: Vec<String> = scopes.to_vec();
    scopes.sort();
    scopes.dedup();
    scopes
}

/// Signed-in account together with the access token from the sign-in.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub identity: Identity,
    pub credential: Credential,
}

/// Calculate the remaining time until token expiry.
pub fn time_until_expiry(expires_at: DateTime<Utc>) -> Option<Duration> {
    let now = Utc::now();

    if expires_at > now {
        Some(expires_at - now)
    } else {
        None
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
