use std::collections::HashMap;

use {toolgate_config::OAuthSettings, tracing::debug};

use crate::types::{Provider, ProviderConfig};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Built-in endpoints and scopes: (auth_url, token_url, scopes).
fn builtin(provider: &str) -> Option<(&'static str, &'static str, &'static [&'static str])> {
    match provider {
        Provider::GMAIL => Some((GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, &[
            "https://www.googleapis.com/auth/gmail.send",
            "https://www.googleapis.com/auth/gmail.readonly",
        ])),
        Provider::GOOGLE => Some((GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, &[
            "openid", "email", "profile",
        ])),
        _ => None,
    }
}

/// Build the usable provider table from `[oauth]` settings.
///
/// Providers without a client id are skipped; they show up as
/// "not configured" when a user tries to authorize.
pub fn resolve_providers(settings: &OAuthSettings) -> HashMap<Provider, ProviderConfig> {
    let mut out = HashMap::new();
    for (name, entry) in &settings.providers {
        let provider = Provider::new(name);
        let Some(client_id) = entry.client_id.clone() else {
            debug!(provider = %provider, "skipping OAuth provider without client id");
            continue;
        };
        let builtin = builtin(provider.as_str());
        let auth_url = entry
            .auth_url
            .clone()
            .or_else(|| builtin.map(|(auth, ..)| auth.to_string()));
        let token_url = entry
            .token_url
            .clone()
            .or_else(|| builtin.map(|(_, token, _)| token.to_string()));
        let (Some(auth_url), Some(token_url)) = (auth_url, token_url) else {
            debug!(provider = %provider, "skipping OAuth provider without endpoints");
            continue;
        };
        let scopes = entry.scopes.clone().unwrap_or_else(|| {
            builtin
                .map(|(.., scopes)| scopes.iter().map(|s| (*s).to_string()).collect())
                .unwrap_or_default()
        });
        let extra_auth_params = if builtin.is_some() {
            vec![
                ("access_type".into(), "offline".into()),
                ("prompt".into(), "consent".into()),
            ]
        } else {
            Vec::new()
        };
        out.insert(provider.clone(), ProviderConfig {
            provider,
            client_id,
            client_secret: entry.client_secret.clone(),
            auth_url,
            token_url,
            redirect_uri: settings.redirect_uri.clone(),
            scopes,
            extra_auth_params,
        });
    }
    out
}
