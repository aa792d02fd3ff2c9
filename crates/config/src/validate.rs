//! Semantic validation of a loaded configuration.

use std::path::PathBuf;

use crate::schema::{KNOWN_PROVIDERS, ToolgateConfig};

/// Longest accepted network timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
/// Longest accepted cache or record lifetime: one year.
pub const MAX_TTL_SECS: u64 = 365 * 86_400;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "timeouts", "health", "ttl", "smtp", "oauth", "intent"
    pub category: &'static str,
    /// Dotted path, e.g. "timeouts.read_secs"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Check a loaded config for values that would break the host at runtime.
#[must_use]
pub fn validate(config: &ToolgateConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let t = &config.timeouts;
    for (field, value) in [
        ("connect_secs", t.connect_secs),
        ("read_secs", t.read_secs),
        ("probe_secs", t.probe_secs),
    ] {
        if value == 0 {
            result.push(
                Severity::Error,
                "timeouts",
                format!("timeouts.{field}"),
                "timeout must be greater than zero",
            );
        } else if value > MAX_TIMEOUT_SECS {
            result.push(
                Severity::Error,
                "timeouts",
                format!("timeouts.{field}"),
                format!("timeout must not exceed {MAX_TIMEOUT_SECS}s"),
            );
        }
    }
    if t.read_secs < t.connect_secs {
        result.push(
            Severity::Error,
            "timeouts",
            "timeouts.read_secs",
            format!(
                "read timeout ({}s) is shorter than the connect timeout ({}s)",
                t.read_secs, t.connect_secs
            ),
        );
    }
    if t.probe_secs > t.read_secs {
        result.push(
            Severity::Warning,
            "timeouts",
            "timeouts.probe_secs",
            "health probe budget exceeds the call budget",
        );
    }

    if config.health.slow_threshold_ms >= t.probe_secs.saturating_mul(1000) {
        result.push(
            Severity::Warning,
            "health",
            "health.slow_threshold_ms",
            "slow threshold is not below the probe timeout; slow probes will time out instead",
        );
    }

    let c = &config.confirmations;
    for (path, value) in [
        ("health.ttl_secs", Some(config.health.ttl_secs)),
        ("confirmations.ttl_secs", Some(c.ttl_secs)),
        ("confirmations.reaper_grace_secs", Some(c.reaper_grace_secs)),
        ("confirmations.reaper_interval_secs", Some(c.reaper_interval_secs)),
        ("oauth.state_ttl_secs", Some(config.oauth.state_ttl_secs)),
        ("tools.cache_ttl_secs", config.tools.cache_ttl_secs),
    ] {
        if value.is_some_and(|v| v > MAX_TTL_SECS) {
            result.push(
                Severity::Error,
                "ttl",
                path,
                format!("must not exceed {MAX_TTL_SECS}s"),
            );
        }
    }
    if c.reaper_interval_secs == 0 {
        result.push(
            Severity::Error,
            "ttl",
            "confirmations.reaper_interval_secs",
            "reaper interval must be greater than zero",
        );
    }

    if !(0.0..=1.0).contains(&config.intent.threshold) {
        result.push(
            Severity::Error,
            "intent",
            "intent.threshold",
            format!(
                "threshold {} is outside [0, 1]",
                config.intent.threshold
            ),
        );
    }

    let smtp = &config.smtp;
    if smtp.username.is_some() != smtp.password.is_some() {
        result.push(
            Severity::Error,
            "smtp",
            "smtp",
            "username and password must be set together",
        );
    }
    if !smtp.is_configured() {
        result.push(
            Severity::Info,
            "smtp",
            "smtp",
            "SMTP fallback is disabled (no credentials)",
        );
    }

    for (name, provider) in &config.oauth.providers {
        if !KNOWN_PROVIDERS.contains(&name.as_str())
            && (provider.auth_url.is_none() || provider.token_url.is_none())
        {
            result.push(
                Severity::Error,
                "oauth",
                format!("oauth.providers.{name}"),
                "custom providers need both auth_url and token_url",
            );
        }
        if provider.client_id.is_none() {
            result.push(
                Severity::Warning,
                "oauth",
                format!("oauth.providers.{name}.client_id"),
                "no client id configured; authorization will be refused",
            );
        }
    }

    result
}
