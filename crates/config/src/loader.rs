use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    schema::{KNOWN_PROVIDERS, ToolgateConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["toolgate.toml", "toolgate.json"];

/// Load config from the given path (TOML or JSON).
pub fn load_config(path: &Path) -> anyhow::Result<ToolgateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load the config at `path` (or discover it), then apply process env overrides.
pub fn load(path: Option<&Path>) -> anyhow::Result<ToolgateConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./toolgate.{toml,json}`
/// 2. `~/.config/toolgate/toolgate.{toml,json}`
///
/// Returns `ToolgateConfig::default()` if no config file is found.
pub fn discover_and_load() -> ToolgateConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    ToolgateConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/toolgate/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "toolgate").map(|d| d.config_dir().to_path_buf())
}

/// Directory holding the server registry and the token store.
///
/// `[storage] data_dir` wins, then the platform data dir, then `./.toolgate`.
pub fn data_dir(config: &ToolgateConfig) -> PathBuf {
    if let Some(dir) = &config.storage.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "toolgate")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".toolgate"))
}

/// Apply environment overrides from the process environment.
pub fn apply_env_overrides(config: &mut ToolgateConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Apply environment overrides using an injected lookup.
///
/// Unparseable numeric values are logged and ignored.
pub fn apply_env_overrides_with(
    config: &mut ToolgateConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    override_parsed(&get, "TOOLGATE_CONNECT_TIMEOUT", &mut config.timeouts.connect_secs);
    // The legacy names are honoured for deployments that already set them.
    for name in ["PIPEDREAM_TIMEOUT", "MCP_TIMEOUT", "TOOLGATE_READ_TIMEOUT"] {
        override_parsed(&get, name, &mut config.timeouts.read_secs);
    }
    override_parsed(&get, "TOOLGATE_PROBE_TIMEOUT", &mut config.timeouts.probe_secs);
    override_parsed(&get, "TOOLGATE_HEALTH_TTL", &mut config.health.ttl_secs);
    override_parsed(
        &get,
        "TOOLGATE_CONFIRMATION_TTL",
        &mut config.confirmations.ttl_secs,
    );

    if let Some(uri) = get("OAUTH_REDIRECT_URI") {
        config.oauth.redirect_uri = uri;
    }
    if let Some(url) = get("TOOLGATE_PUBLIC_URL") {
        config.server.public_url = Some(url);
    }

    let client_id = get("GOOGLE_CLIENT_ID");
    let client_secret = get("GOOGLE_CLIENT_SECRET");
    for provider in KNOWN_PROVIDERS {
        let entry = config
            .oauth
            .providers
            .entry((*provider).to_string())
            .or_default();
        if entry.client_id.is_none() {
            entry.client_id.clone_from(&client_id);
        }
        if entry.client_secret.is_none() {
            entry.client_secret = client_secret.clone().map(Secret::new);
        }
    }

    if let Some(host) = get("SMTP_SERVER") {
        config.smtp.host = host;
    }
    override_parsed(&get, "SMTP_PORT", &mut config.smtp.port);
    if let Some(username) = get("SMTP_USERNAME") {
        config.smtp.username = Some(username);
    }
    if let Some(password) = get("SMTP_PASSWORD") {
        config.smtp.password = Some(Secret::new(password));
    }
    if let Some(from) = get("SMTP_FROM") {
        config.smtp.from = Some(from);
    }

    if let Some(dir) = get("TOOLGATE_DATA_DIR") {
        config.storage.data_dir = Some(PathBuf::from(dir));
    }
}

fn override_parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) {
    let Some(raw) = get(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(var = name, value = %raw, "ignoring unparseable env override"),
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ToolgateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
