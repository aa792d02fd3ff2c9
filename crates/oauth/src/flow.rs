use {
    chrono::{DateTime, Duration, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    url::Url,
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{counter, oauth as oauth_metrics};

use crate::{
    Error, Result,
    types::{Provider, ProviderConfig},
};

/// Authorization-code flow with PKCE for one provider.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    config: ProviderConfig,
    client: reqwest::Client,
}

/// Tokens returned by the token endpoint, before they are bound to a user.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl OAuthFlow {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn provider(&self) -> &Provider {
        &self.config.provider
    }

    /// Build the provider consent URL for the given state and PKCE challenge.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::FLOW_STARTS_TOTAL).increment(1);

        let mut url = Url::parse(&self.config.auth_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("state", state);
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            for (key, value) in &self.config.extra_auth_params {
                query.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens. `now` anchors `expires_in`.
    pub async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
            ("code_verifier", verifier.to_string()),
        ];
        self.push_secret(&mut form);

        match self.post_token(&form, now).await {
            Ok(grant) => {
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::FLOW_COMPLETIONS_TOTAL).increment(1);
                Ok(grant)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::CODE_EXCHANGE_ERRORS_TOTAL).increment(1);
                Err(e)
            },
        }
    }

    /// Refresh an access token.
    pub async fn refresh(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<TokenGrant> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::TOKEN_REFRESH_TOTAL).increment(1);

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        self.push_secret(&mut form);

        let result = self.post_token(&form, now).await;
        #[cfg(feature = "metrics")]
        {
            if result.is_err() {
                counter!(oauth_metrics::TOKEN_REFRESH_FAILURES_TOTAL).increment(1);
            }
        }
        result
    }

    fn push_secret(&self, form: &mut Vec<(&'static str, String)>) {
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.expose_secret().clone()));
        }
    }

    async fn post_token(
        &self,
        form: &[(&'static str, String)],
        now: DateTime<Utc>,
    ) -> Result<TokenGrant> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: TokenResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(TokenGrant {
            access_token: Secret::new(parsed.access_token),
            refresh_token: parsed.refresh_token.map(Secret::new),
            token_type: parsed.token_type.unwrap_or_else(|| "Bearer".into()),
            expires_at: parsed.expires_in.map(|secs| expiry_from(now, secs)),
            scope: parsed.scope,
        })
    }
}

/// Absolute expiry for an `expires_in` value. Non-positive or unrepresentable
/// lifetimes yield `now`, so the token counts as already expired.
fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    if expires_in <= 0 {
        return now;
    }
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest, std::collections::HashMap};

    fn config(token_url: String) -> ProviderConfig {
        ProviderConfig {
            provider: Provider::gmail(),
            client_id: "cid".into(),
            client_secret: Some(Secret::new("csecret".into())),
            auth_url: "https://accounts.example.com/auth".into(),
            token_url,
            redirect_uri: "http://localhost:3000/oauth/callback".into(),
            scopes: vec!["a".into(), "b".into()],
            extra_auth_params: vec![("prompt".into(), "consent".into())],
        }
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let flow = OAuthFlow::new(config("https://x/token".into()), reqwest::Client::new());
        let url = Url::parse(&flow.authorization_url("st-1", "chal").unwrap()).unwrap();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["state"], "st-1");
        assert_eq!(query["code_challenge"], "chal");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["scope"], "a b");
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["client_id"], "cid");
    }

    #[tokio::test]
    async fn exchange_parses_token_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "the-code".into()),
                mockito::Matcher::UrlEncoded("code_verifier".into(), "ver".into()),
                mockito::Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":3600,"scope":"a b"}"#)
            .create_async()
            .await;

        let flow = OAuthFlow::new(
            config(format!("{}/token", server.url())),
            reqwest::Client::new(),
        );
        let now = Utc::now();
        let grant = flow.exchange("the-code", "ver", now).await.unwrap();
        assert_eq!(grant.access_token.expose_secret(), "at");
        assert_eq!(
            grant.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("rt")
        );
        assert_eq!(grant.token_type, "Bearer");
        assert_eq!(grant.expires_at, Some(now + Duration::seconds(3600)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_maps_to_token_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let flow = OAuthFlow::new(
            config(format!("{}/token", server.url())),
            reqwest::Client::new(),
        );
        let err = flow.refresh("stale", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::TokenEndpoint { status: 400, ref body } if body.contains("invalid_grant")));
    }

    #[rstest]
    #[case::huge(i64::MAX)]
    #[case::beyond_date_range(i64::MAX / 1000)]
    #[case::negative(-60)]
    #[case::zero(0)]
    #[tokio::test]
    async fn out_of_range_lifetime_counts_as_expired(#[case] expires_in: i64) {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"access_token":"at","expires_in":{expires_in}}}"#))
            .create_async()
            .await;

        let flow = OAuthFlow::new(
            config(format!("{}/token", server.url())),
            reqwest::Client::new(),
        );
        let now = Utc::now();
        let grant = flow.refresh("rt", now).await.unwrap();
        assert_eq!(grant.expires_at, Some(now));
    }

    #[test]
    fn expiry_is_anchored_to_the_given_instant() {
        let now = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(expiry_from(now, 90), now + Duration::seconds(90));
    }
}
