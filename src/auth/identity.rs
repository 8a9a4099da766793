//! Signed-in user identity derived from the ID token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Reference to a signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable account key, `<oid>.<tid>` for Azure AD accounts.
    pub home_account_id: String,
    /// Sign-in name (usually the UPN or email).
    pub username: String,
    /// Display name, when the provider sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl Identity {
    pub fn new(home_account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            username: username.into(),
            name: None,
            tenant_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Get the best available display name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }

    /// Build an identity from the claims of an ID token.
    ///
    /// The token comes straight from the token endpoint over TLS, so the
    /// signature is not checked here.
    pub fn from_id_token(id_token: &str) -> Result<Self, AuthError> {
        let claims = IdTokenClaims::decode(id_token)?;

        let home_account_id = match (&claims.oid, &claims.tid) {
            (Some(oid), Some(tid)) => format!("{}.{}", oid, tid),
            _ => claims.sub.clone(),
        };

        let username = claims
            .preferred_username
            .clone()
            .or_else(|| claims.email.clone())
            .unwrap_or_else(|| claims.sub.clone());

        Ok(Self {
            home_account_id,
            username,
            name: claims.name,
            tenant_id: claims.tid,
        })
    }
}

/// Subset of OpenID Connect ID token claims used to build an [`Identity`].
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a compact JWT.
    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(AuthError::InvalidIdToken("expected three segments".into())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidIdToken(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidIdToken(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) fn fake_id_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_from_azure_claims() {
        let token = fake_id_token(&json!({
            "sub": "subject",
            "oid": "00000000-0000-0000-0000-000000000001",
            "tid": "tenant-1",
            "preferred_username": "ada@contoso.com",
            "name": "Ada Lovelace"
        }));

        let identity = Identity::from_id_token(&token).unwrap();
        assert_eq!(
            identity.home_account_id,
            "00000000-0000-0000-0000-000000000001.tenant-1"
        );
        assert_eq!(identity.username, "ada@contoso.com");
        assert_eq!(identity.display_name(), "Ada Lovelace");
        assert_eq!(identity.tenant_id.as_deref(), Some("tenant-1"));
    }

    #[test]
    fn test_identity_falls_back_to_sub() {
        let token = fake_id_token(&json!({ "sub": "only-sub" }));

        let identity = Identity::from_id_token(&token).unwrap();
        assert_eq!(identity.home_account_id, "only-sub");
        assert_eq!(identity.username, "only-sub");
        assert_eq!(identity.display_name(), "only-sub");
    }

    #[test]
    fn test_invalid_id_token() {
        assert!(matches!(
            Identity::from_id_token("not-a-jwt"),
            Err(AuthError::InvalidIdToken(_))
        ));
        assert!(matches!(
            Identity::from_id_token("a.!!!.c"),
            Err(AuthError::InvalidIdToken(_))
        ));

        let missing_sub = fake_id_token(&json!({ "name": "x" }));
        assert!(Identity::from_id_token(&missing_sub).is_err());
    }
}
