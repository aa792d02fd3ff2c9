use std::fmt;

use {
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// An OAuth provider name such as `gmail` or `google`.
///
/// Stored lowercase so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(String);

impl Provider {
    pub const GMAIL: &'static str = "gmail";
    pub const GOOGLE: &'static str = "google";

    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn gmail() -> Self {
        Self(Self::GMAIL.into())
    }

    #[must_use]
    pub fn google() -> Self {
        Self(Self::GOOGLE.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-facing name for prompts ("Gmail", "Google").
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully resolved provider endpoints and client credentials.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Extra query parameters for the authorization URL.
    pub extra_auth_params: Vec<(String, String)>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// A pending authorization, consumed exactly once by the callback.
#[derive(Debug, Clone)]
pub struct OAuthState {
    pub state: String,
    pub user_id: String,
    pub server_id: String,
    pub provider: Provider,
    pub pkce_verifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OAuthState {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Identity of a stored token set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenKey {
    pub user_id: String,
    pub server_id: String,
    pub provider: Provider,
}

impl TokenKey {
    #[must_use]
    pub fn new(user_id: &str, server_id: &str, provider: &Provider) -> Self {
        Self {
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            provider: provider.clone(),
        }
    }
}

/// Stored OAuth token set for one (user, server, provider).
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub user_id: String,
    pub server_id: String,
    pub provider: Provider,
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Store-assigned write counter used for compare-and-swap updates.
    #[serde(default)]
    pub revision: u64,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl OAuthToken {
    #[must_use]
    pub fn key(&self) -> TokenKey {
        TokenKey::new(&self.user_id, &self.server_id, &self.provider)
    }

    /// A token without an expiry never expires.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("user_id", &self.user_id)
            .field("server_id", &self.server_id)
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("revision", &self.revision)
            .finish()
    }
}

/// Per-server authorization status shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub server_id: String,
    pub provider: Provider,
    pub is_valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through the token file.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, chrono::Duration};

    fn token(expires_at: Option<DateTime<Utc>>) -> OAuthToken {
        OAuthToken {
            user_id: "u1".into(),
            server_id: "s1".into(),
            provider: Provider::gmail(),
            access_token: Secret::new("at-123".into()),
            refresh_token: Some(Secret::new("rt-456".into())),
            token_type: "Bearer".into(),
            expires_at,
            scope: Some("gmail.send".into()),
            updated_at: Utc::now(),
            revision: 0,
        }
    }

    #[test]
    fn provider_is_normalized() {
        assert_eq!(Provider::new(" Gmail "), Provider::gmail());
        assert_eq!(Provider::gmail().display_name(), "Gmail");
        assert_eq!(Provider::new("").display_name(), "");
    }

    #[test]
    fn token_expiry() {
        let now = Utc::now();
        assert!(!token(None).is_expired(now));
        assert!(!token(Some(now + Duration::seconds(30))).is_expired(now));
        assert!(token(Some(now)).is_expired(now));
        assert!(token(Some(now - Duration::seconds(1))).is_expired(now));
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", token(None));
        assert!(!rendered.contains("at-123"));
        assert!(!rendered.contains("rt-456"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn token_roundtrips_through_json() {
        let original = token(Some(Utc::now()));
        let json = serde_json::to_string(&original).unwrap();
        let back: OAuthToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key(), original.key());
        assert_eq!(back.access_token.expose_secret(), "at-123");
        assert_eq!(back.bearer(), "Bearer at-123");
    }
}
