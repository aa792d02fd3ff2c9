//! Configuration loading, validation and env substitution.
//!
//! Config files: `toolgate.toml` or `toolgate.json`,
//! searched in `./` then `~/.config/toolgate/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file, followed by environment overrides for the operational tunables.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, apply_env_overrides_with, config_dir, data_dir, discover_and_load,
        load, load_config,
    },
    schema::{
        ConfirmationsConfig, HealthConfig, IntentConfig, ListenConfig, OAuthSettings,
        ProviderSettings, SmtpConfig, StorageConfig, TimeoutsConfig, ToolgateConfig, ToolsConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
