//! `/api/oauth/*` routes: start an authorization, receive the provider
//! callback, list and revoke a user's tokens.
//!
//! The calling user comes from the `x-user-id` header set by the upstream
//! authentication layer.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{FromRequestParts, Path, Query, State},
        http::{StatusCode, request::Parts},
        response::{IntoResponse, Redirect, Response},
        routing::{delete, get},
    },
    serde::Deserialize,
    toolgate_common::{Classify, ErrorKind},
    toolgate_oauth::Provider,
    tracing::{info, warn},
};

use crate::{error::HostError, host::McpHost};

pub const USER_HEADER: &str = "x-user-id";

/// Build the router mounted at `/api/oauth`.
pub fn oauth_router() -> axum::Router<Arc<McpHost>> {
    axum::Router::new()
        .route("/authorize", get(authorize_redirect_handler).post(authorize_handler))
        .route("/callback", get(callback_handler))
        .route("/status", get(status_handler))
        .route("/tokens/{server_id}", delete(revoke_handler))
}

// ── Caller identity ──────────────────────────────────────────────────────────

pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_string()))
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing x-user-id header"))
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn status_for(error: &HostError) -> StatusCode {
    match error.kind() {
        ErrorKind::ServerNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Configuration
        | ErrorKind::InvalidState
        | ErrorKind::StateExpired
        | ErrorKind::SchemaValidationFailed => StatusCode::BAD_REQUEST,
        ErrorKind::ReauthRequired => StatusCode::UNAUTHORIZED,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionLost | ErrorKind::InvalidResponse => {
            StatusCode::BAD_GATEWAY
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Authorize ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AuthorizeRequest {
    server_id: String,
    #[serde(default)]
    provider: Option<String>,
}

struct Started {
    oauth_url: String,
    state: String,
    provider: Provider,
    server_name: String,
}

/// Resolve the server and provider, then create the consent URL.
fn begin(
    host: &McpHost,
    user_id: &str,
    request: &AuthorizeRequest,
) -> Result<Started, Response> {
    let server = host
        .server_for(user_id, &request.server_id)
        .map_err(|e| error_response(status_for(&e), e.to_string()))?;

    let provider = match request.provider.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Provider::new(name),
        _ => host.provider_for(&server).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("no OAuth provider could be determined for server '{}'", server.id),
            )
        })?,
    };

    let start = host
        .oauth()
        .begin_authorization(user_id, &server.id, &provider)
        .map_err(|e| {
            let e = HostError::from(e);
            error_response(status_for(&e), e.to_string())
        })?;
    Ok(Started {
        oauth_url: start.authorization_url,
        state: start.state,
        provider: start.provider,
        server_name: server.name,
    })
}

async fn authorize_handler(
    State(host): State<Arc<McpHost>>,
    UserId(user_id): UserId,
    Json(body): Json<AuthorizeRequest>,
) -> Response {
    match begin(&host, &user_id, &body) {
        Ok(started) => Json(serde_json::json!({
            "oauth_url": started.oauth_url,
            "state": started.state,
            "provider": started.provider,
            "server_name": started.server_name,
        }))
        .into_response(),
        Err(response) => response,
    }
}

/// Same as `POST /authorize`, but redirects the browser to the provider.
/// This is the link embedded in re-authentication prompts.
async fn authorize_redirect_handler(
    State(host): State<Arc<McpHost>>,
    UserId(user_id): UserId,
    Query(query): Query<AuthorizeRequest>,
) -> Response {
    match begin(&host, &user_id, &query) {
        Ok(started) => Redirect::to(&started.oauth_url).into_response(),
        Err(response) => response,
    }
}

// ── Callback ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

fn callback_redirect(host: &McpHost, pairs: &[(&str, &str)]) -> Response {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        query.append_pair(key, value);
    }
    let base = host.public_url().trim_end_matches('/');
    let base = if base.is_empty() { "/" } else { base };
    Redirect::to(&format!("{base}?{}", query.finish())).into_response()
}

async fn callback_handler(
    State(host): State<Arc<McpHost>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error.as_deref() {
        warn!(error, "provider denied OAuth authorization");
        return callback_redirect(&host, &[("oauth", "error"), ("reason", error)]);
    }
    let (Some(code), Some(state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing code or state");
    };

    match host.complete_authorization(code, state).await {
        Ok(token) => callback_redirect(&host, &[
            ("oauth", "success"),
            ("server_id", token.server_id.as_str()),
            ("provider", token.provider.as_str()),
        ]),
        Err(e) => {
            warn!(error = %e, "OAuth callback failed");
            callback_redirect(&host, &[("oauth", "error"), ("reason", e.kind().as_str())])
        },
    }
}

// ── Status and revocation ────────────────────────────────────────────────────

async fn status_handler(State(host): State<Arc<McpHost>>, UserId(user_id): UserId) -> impl IntoResponse {
    Json(host.authorization_status(&user_id))
}

#[derive(Deserialize)]
struct RevokeQuery {
    provider: Option<String>,
}

async fn revoke_handler(
    State(host): State<Arc<McpHost>>,
    UserId(user_id): UserId,
    Path(server_id): Path<String>,
    Query(query): Query<RevokeQuery>,
) -> Response {
    let provider = query.provider.as_deref().map(Provider::new);
    match host.revoke_authorization(&user_id, &server_id, provider.as_ref()) {
        Ok(revoked) => {
            info!(user_id, server_id, revoked, "OAuth tokens revoked");
            StatusCode::NO_CONTENT.into_response()
        },
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}
