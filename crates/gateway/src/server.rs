use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::get,
    },
    tokio_util::sync::CancellationToken,
    toolgate_config::ToolgateConfig,
    tracing::info,
};

#[cfg(feature = "prometheus")]
use axum::{
    http::{StatusCode, header},
    response::Response,
};

#[cfg(feature = "metrics")]
use toolgate_metrics::MetricsHandle;

use crate::{host::McpHost, oauth_routes::oauth_router};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<McpHost>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<MetricsHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(host: Arc<McpHost>) -> Self {
        Self {
            host,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the HTTP app (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/api/oauth", oauth_router().with_state(Arc::clone(&state.host)));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(prometheus_metrics_handler));

    router.with_state(state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Run the HTTP surface and the background maintenance tasks until Ctrl-C.
pub async fn start_server(config: ToolgateConfig, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let cancel = CancellationToken::new();
    let tasks = state.host.spawn_maintenance(cancel.clone());
    let host = Arc::clone(&state.host);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        public_url = host.public_url(),
        servers = host.servers().list().len(),
        "toolgate listening"
    );

    let shutdown = cancel.clone();
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown.cancelled() => {},
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
            }
        })
        .await?;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    host.shutdown().await;
    info!("toolgate stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "servers": state.host.servers().list().len(),
        "pooled_connections": state.host.connector().pooled(),
        "pending_confirmations": state.host.confirmations().len(),
    }))
}

/// Prometheus text exposition. Unauthenticated so scrapers can reach it.
#[cfg(feature = "prometheus")]
async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not enabled",
        )
            .into_response(),
    }
}
