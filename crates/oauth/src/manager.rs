//! The OAuth service object: one per process, shared by `Arc`.

use std::collections::HashMap;

use {
    chrono::{DateTime, Duration, Utc},
    secrecy::{ExposeSecret, Secret},
    toolgate_common::{KeyedLocks, SharedClock, saturating_add, to_chrono},
    toolgate_config::OAuthSettings,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    defaults::resolve_providers,
    flow::{OAuthFlow, TokenGrant},
    pkce::{generate_pkce, generate_state},
    state_store::StateStore,
    storage::TokenStore,
    types::{OAuthState, OAuthToken, Provider, ProviderConfig, TokenKey, TokenStatus},
};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;

/// What the caller needs to send the user to the provider.
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub authorization_url: String,
    pub state: String,
    pub provider: Provider,
    pub expires_at: DateTime<Utc>,
}

pub struct OAuthTokenManager {
    flows: HashMap<Provider, OAuthFlow>,
    states: StateStore,
    tokens: TokenStore,
    refresh_locks: KeyedLocks<TokenKey>,
    clock: SharedClock,
    state_ttl: Duration,
}

impl OAuthTokenManager {
    pub fn new(
        settings: &OAuthSettings,
        tokens: TokenStore,
        client: reqwest::Client,
        clock: SharedClock,
    ) -> Self {
        let configs = resolve_providers(settings).into_values();
        let state_ttl = to_chrono(std::time::Duration::from_secs(settings.state_ttl_secs));
        Self::with_providers(configs, tokens, client, clock, state_ttl)
    }

    pub fn with_providers(
        configs: impl IntoIterator<Item = ProviderConfig>,
        tokens: TokenStore,
        client: reqwest::Client,
        clock: SharedClock,
        state_ttl: Duration,
    ) -> Self {
        let flows = configs
            .into_iter()
            .map(|config| {
                (
                    config.provider.clone(),
                    OAuthFlow::new(config, client.clone()),
                )
            })
            .collect();
        Self {
            flows,
            states: StateStore::new(),
            tokens,
            refresh_locks: KeyedLocks::new(),
            clock,
            state_ttl,
        }
    }

    #[must_use]
    pub fn is_configured(&self, provider: &Provider) -> bool {
        self.flows.contains_key(provider)
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn flow(&self, provider: &Provider) -> Result<&OAuthFlow> {
        self.flows
            .get(provider)
            .ok_or_else(|| Error::ProviderNotConfigured {
                provider: provider.clone(),
            })
    }

    /// Create a single-use state and the provider consent URL embedding it.
    pub fn begin_authorization(
        &self,
        user_id: &str,
        server_id: &str,
        provider: &Provider,
    ) -> Result<AuthorizationStart> {
        let flow = self.flow(provider)?;
        let pkce = generate_pkce();
        let state = generate_state();
        let authorization_url = flow.authorization_url(&state, &pkce.challenge)?;

        let now = self.clock.now();
        let expires_at = saturating_add(now, self.state_ttl);
        self.states.insert(OAuthState {
            state: state.clone(),
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            provider: provider.clone(),
            pkce_verifier: pkce.verifier,
            created_at: now,
            expires_at,
        });
        info!(user_id, server_id, provider = %provider, "OAuth authorization started");

        Ok(AuthorizationStart {
            authorization_url,
            state,
            provider: provider.clone(),
            expires_at,
        })
    }

    /// Redeem `state` and exchange `code` for a token set.
    ///
    /// The state is consumed before the exchange, so a failed exchange still
    /// requires a fresh authorization.
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<OAuthToken> {
        let pending = self.states.take(state, self.clock.now())?;
        let flow = self.flow(&pending.provider)?;
        let grant = flow.exchange(code, &pending.pkce_verifier, self.clock.now()).await?;
        let token = self.token_from_grant(
            &TokenKey::new(&pending.user_id, &pending.server_id, &pending.provider),
            grant,
            None,
        );
        let stored = self.tokens.upsert(token)?;
        info!(
            user_id = %pending.user_id,
            server_id = %pending.server_id,
            provider = %pending.provider,
            "OAuth authorization completed"
        );
        Ok(stored)
    }

    /// Return a usable token, refreshing it if it expired.
    ///
    /// A token that cannot be refreshed is deleted and the caller gets
    /// [`Error::ReauthRequired`].
    pub async fn get_valid_token(
        &self,
        user_id: &str,
        server_id: &str,
        provider: &Provider,
    ) -> Result<OAuthToken> {
        let key = TokenKey::new(user_id, server_id, provider);
        let skew = Duration::seconds(EXPIRY_SKEW_SECS);

        match self.tokens.get(&key) {
            None => return Err(Error::reauth(provider)),
            Some(token) if !token.is_expired(self.clock.now() + skew) => return Ok(token),
            Some(_) => {},
        }

        let _guard = self.refresh_locks.lock(&key).await;
        // Another caller may have refreshed or revoked while we waited.
        let Some(current) = self.tokens.get(&key) else {
            return Err(Error::reauth(provider));
        };
        if !current.is_expired(self.clock.now() + skew) {
            return Ok(current);
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            debug!(user_id, server_id, provider = %provider, "expired token has no refresh token");
            self.tokens.remove_if_revision(&key, current.revision)?;
            return Err(Error::reauth(provider));
        };

        let grant = match self.flow(provider) {
            Ok(flow) => {
                flow.refresh(refresh_token.expose_secret(), self.clock.now())
                    .await
            },
            Err(e) => Err(e),
        };
        match grant {
            Ok(grant) => {
                let refreshed = self.token_from_grant(&key, grant, Some(refresh_token));
                match self
                    .tokens
                    .replace_if_unchanged(&key, current.revision, refreshed)?
                {
                    Some(stored) => {
                        debug!(user_id, server_id, provider = %provider, "OAuth token refreshed");
                        Ok(stored)
                    },
                    // Revoked or re-authorized while the refresh was in flight.
                    None => self.tokens.get(&key).ok_or_else(|| Error::reauth(provider)),
                }
            },
            Err(e) => {
                warn!(user_id, server_id, provider = %provider, error = %e, "OAuth token refresh failed");
                self.tokens.remove_if_revision(&key, current.revision)?;
                Err(Error::reauth(provider))
            },
        }
    }

    /// `Authorization` header for a call, or `ReauthRequired`.
    pub async fn auth_headers(
        &self,
        user_id: &str,
        server_id: &str,
        provider: &Provider,
    ) -> Result<Vec<(String, String)>> {
        let token = self.get_valid_token(user_id, server_id, provider).await?;
        Ok(vec![("Authorization".to_string(), token.bearer())])
    }

    /// Delete the stored token. Idempotent.
    pub fn revoke(&self, user_id: &str, server_id: &str, provider: &Provider) -> Result<()> {
        let removed = self
            .tokens
            .remove(&TokenKey::new(user_id, server_id, provider))?;
        info!(user_id, server_id, provider = %provider, removed, "OAuth token revoked");
        Ok(())
    }

    /// Drop every token and pending state for a deleted server.
    pub fn revoke_server(&self, server_id: &str) -> Result<usize> {
        self.states.remove_server(server_id);
        self.tokens.remove_server(server_id)
    }

    /// Token status for every server the user has authorized.
    #[must_use]
    pub fn status(&self, user_id: &str) -> Vec<TokenStatus> {
        let now = self.clock.now();
        self.tokens
            .list_for_user(user_id)
            .into_iter()
            .map(|t| TokenStatus {
                is_valid: !t.is_expired(now) || t.refresh_token.is_some(),
                server_id: t.server_id,
                provider: t.provider,
                expires_at: t.expires_at,
                scope: t.scope,
            })
            .collect()
    }

    pub fn purge_expired_states(&self) -> usize {
        self.states.purge_expired(self.clock.now())
    }

    fn token_from_grant(
        &self,
        key: &TokenKey,
        grant: TokenGrant,
        previous_refresh: Option<Secret<String>>,
    ) -> OAuthToken {
        OAuthToken {
            user_id: key.user_id.clone(),
            server_id: key.server_id.clone(),
            provider: key.provider.clone(),
            access_token: grant.access_token,
            // Providers usually omit the refresh token on refresh.
            refresh_token: grant.refresh_token.or(previous_refresh),
            token_type: grant.token_type,
            expires_at: grant.expires_at,
            scope: grant.scope,
            updated_at: self.clock.now(),
            revision: 0,
        }
    }
}
