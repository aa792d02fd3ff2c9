#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{collections::HashMap, sync::Arc};

use {
    chrono::{Duration, Utc},
    secrecy::{ExposeSecret, Secret},
    toolgate_common::{Clock, ManualClock, SystemClock},
    toolgate_config::{OAuthSettings, ProviderSettings},
    toolgate_oauth::{OAuthToken, OAuthTokenManager, Provider, TokenKey, TokenStore},
    url::Url,
};

fn settings(token_url: &str) -> OAuthSettings {
    let mut providers = HashMap::new();
    providers.insert("gmail".to_string(), ProviderSettings {
        client_id: Some("client-id".into()),
        client_secret: Some(Secret::new("client-secret".into())),
        token_url: Some(token_url.to_string()),
        ..Default::default()
    });
    OAuthSettings {
        providers,
        ..Default::default()
    }
}

#[tokio::test]
async fn authorize_callback_roundtrip_persists_token() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "client_secret".into(),
            "client-secret".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":3600,"scope":"gmail.send"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oauth_tokens.json");
    let manager = OAuthTokenManager::new(
        &settings(&format!("{}/token", server.url())),
        TokenStore::open(&path).unwrap(),
        reqwest::Client::new(),
        SystemClock::shared(),
    );

    let start = manager
        .begin_authorization("alice", "gmail-server", &Provider::gmail())
        .unwrap();
    let url = Url::parse(&start.authorization_url).unwrap();
    assert_eq!(url.host_str(), Some("accounts.google.com"));
    let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["access_type"], "offline");
    assert_eq!(query["redirect_uri"], "http://localhost:3000/oauth/callback");

    let token = manager
        .complete_authorization("auth-code", &start.state)
        .await
        .unwrap();
    assert_eq!(token.scope.as_deref(), Some("gmail.send"));

    let reopened = TokenStore::open(&path).unwrap();
    let key = TokenKey::new("alice", "gmail-server", &Provider::gmail());
    assert_eq!(
        reopened.get(&key).unwrap().access_token.expose_secret(),
        "at"
    );

    let headers = manager
        .auth_headers("alice", "gmail-server", &Provider::gmail())
        .await
        .unwrap();
    assert_eq!(headers, vec![("Authorization".to_string(), "Bearer at".to_string())]);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"refreshed","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::starting_now();
    let manager = Arc::new(OAuthTokenManager::new(
        &settings(&format!("{}/token", server.url())),
        TokenStore::in_memory(),
        reqwest::Client::new(),
        clock.clone(),
    ));
    manager
        .tokens()
        .upsert(OAuthToken {
            user_id: "alice".into(),
            server_id: "gmail-server".into(),
            provider: Provider::gmail(),
            access_token: Secret::new("stale".into()),
            refresh_token: Some(Secret::new("rt".into())),
            token_type: "Bearer".into(),
            expires_at: Some(clock.now() - Duration::minutes(5)),
            scope: None,
            updated_at: Utc::now(),
            revision: 0,
        })
        .unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .get_valid_token("alice", "gmail-server", &Provider::gmail())
                    .await
            })
        })
        .collect();
    for task in tasks {
        let token = task.await.unwrap().unwrap();
        assert_eq!(token.access_token.expose_secret(), "refreshed");
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn revoke_server_clears_all_users() {
    let manager = OAuthTokenManager::new(
        &OAuthSettings::default(),
        TokenStore::in_memory(),
        reqwest::Client::new(),
        SystemClock::shared(),
    );
    for user in ["alice", "bob"] {
        manager
            .tokens()
            .upsert(OAuthToken {
                user_id: user.into(),
                server_id: "drive".into(),
                provider: Provider::google(),
                access_token: Secret::new("x".into()),
                refresh_token: None,
                token_type: "Bearer".into(),
                expires_at: None,
                scope: None,
                updated_at: Utc::now(),
                revision: 0,
            })
            .unwrap();
    }
    assert_eq!(manager.revoke_server("drive").unwrap(), 2);
    let err = manager
        .get_valid_token("bob", "drive", &Provider::google())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Google"));
}
