//! Configuration schema for toolgate.
//!
//! Every field has a default so an empty file (or no file) is a valid config.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {secrecy::Secret, serde::Deserialize};

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/oauth/callback";

/// Providers with built-in endpoint defaults. Both use the Google client.
pub const KNOWN_PROVIDERS: &[&str] = &["gmail", "google"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolgateConfig {
    pub server: ListenConfig,
    pub timeouts: TimeoutsConfig,
    pub health: HealthConfig,
    pub confirmations: ConfirmationsConfig,
    pub tools: ToolsConfig,
    pub intent: IntentConfig,
    pub oauth: OAuthSettings,
    pub smtp: SmtpConfig,
    pub storage: StorageConfig,
}

/// HTTP listener for the OAuth surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub bind: String,
    pub port: u16,
    /// Externally reachable base URL, used in authorize links and redirects.
    pub public_url: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub connect_secs: u64,
    /// Read timeout, also used as the overall call budget.
    pub read_secs: u64,
    /// Budget for a single health probe.
    pub probe_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            read_secs: 300,
            probe_secs: 10,
        }
    }
}

impl TimeoutsConfig {
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    #[must_use]
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub ttl_secs: u64,
    pub slow_threshold_ms: u64,
    /// Collapse concurrent probes for one server into a single request.
    pub single_flight: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            slow_threshold_ms: 5_000,
            single_flight: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmationsConfig {
    pub ttl_secs: u64,
    pub reaper_interval_secs: u64,
    pub reaper_grace_secs: u64,
}

impl Default for ConfirmationsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            reaper_interval_secs: 60,
            reaper_grace_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Unset means discovered tools stay cached until an explicit refresh.
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    pub threshold: f64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub redirect_uri: String,
    pub state_ttl_secs: u64,
    /// Per-provider overrides keyed by provider name (`gmail`, `google`).
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            redirect_uri: DEFAULT_REDIRECT_URI.into(),
            state_ttl_secs: 600,
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    /// Sender address; defaults to `username`.
    pub from: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".into(),
            port: 587,
            username: None,
            password: None,
            from: None,
        }
    }
}

impl SmtpConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for `servers.json` and `oauth_tokens.json`.
    pub data_dir: Option<PathBuf>,
}
