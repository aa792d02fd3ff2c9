//! OAuth support for MCP servers that act on a user's behalf.
//!
//! - Single-use authorization state with a bounded lifetime (`state_store`)
//! - Per (user, server, provider) token storage with upsert semantics (`storage`)
//! - Authorization-code flow with PKCE, exchange and refresh (`flow`)
//! - The [`OAuthTokenManager`] service tying them together (`manager`)
//! - Best-effort provider inference from a server endpoint (`detect`)

pub mod defaults;
pub mod detect;
pub mod error;
pub mod flow;
pub mod manager;
pub mod pkce;
pub mod state_store;
pub mod storage;
pub mod types;

pub use {
    defaults::resolve_providers,
    detect::detect_provider,
    error::{Error, Result},
    flow::OAuthFlow,
    manager::{AuthorizationStart, OAuthTokenManager},
    state_store::StateStore,
    storage::TokenStore,
    types::{
        OAuthState, OAuthToken, PkceChallenge, Provider, ProviderConfig, TokenKey, TokenStatus,
        serialize_option_secret, serialize_secret,
    },
};
