//! The MCP host: one service object wiring server configs, transports, tool
//! discovery, health gating, OAuth, intent detection, confirmations and
//! fallback into the request pipeline the chat layer calls.

use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    serde_json::Value,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    toolgate_common::{Classify, ErrorKind, SharedClock, SystemClock},
    toolgate_config::ToolgateConfig,
    toolgate_fallback::{ActionResult, FallbackExecutor},
    toolgate_intent::{
        ConfirmationAction, ConfirmationBroker, ConfirmationRecord, ConfirmationStatus,
        IntentDetector, IntentKind, IntentMatch, parse_confirmation_command, prompts,
    },
    toolgate_mcp::{
        CallOptions, CallTimeouts, HealthCheckResult, HealthChecker, HealthProbe, HealthSettings,
        ServerConfig, ServerRecord, ServerStore, ToolDescriptor, ToolRegistry, ToolsCallResult,
        TransportConnector, TransportKind, pipedream, validate_arguments,
    },
    toolgate_oauth::{OAuthToken, OAuthTokenManager, Provider, TokenStore, detect_provider},
    tracing::{debug, info, warn},
};

use crate::error::{HostError, Result};

const SERVERS_FILE: &str = "servers.json";
const TOKENS_FILE: &str = "oauth_tokens.json";

/// What the chat layer should do with an incoming message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Nothing tool-related; answer normally.
    NoIntent,
    /// An intent was detected but the user has no server that serves it.
    SetupRequired { intent: IntentMatch, prompt: String },
    /// A pending confirmation was issued.
    ConfirmationRequired {
        confirmation: ConfirmationRecord,
        prompt: String,
    },
    /// The message was a `confirm <id>` / `cancel <id>` reply.
    Resolved(Resolution),
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub confirmation: ConfirmationRecord,
    pub notice: String,
}

impl Resolution {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmation.status == ConfirmationStatus::Confirmed
    }
}

/// A tool invocation chosen by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRequest {
    pub server_id: String,
    pub tool: String,
    pub arguments: Value,
    /// Selects the fallback strategy. Inferred from the tool name if unset.
    pub intent: Option<IntentKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Primary,
    Fallback,
}

/// Whether the result proves the action happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Verified { message_id: String },
    Unverified,
    NotApplicable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub server_id: String,
    pub tool: String,
    pub path: ExecutionPath,
    pub verification: Verification,
    /// Text for the model or the user.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolsCallResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ActionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub server_id: String,
    pub tools_dropped: bool,
    pub tokens_revoked: usize,
    pub confirmations_dropped: usize,
}

/// Token status joined with the server's display name.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationStatus {
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub provider: Provider,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub struct McpHost {
    servers: ServerStore,
    connector: Arc<TransportConnector>,
    tools: ToolRegistry,
    health: HealthChecker,
    oauth: OAuthTokenManager,
    detector: IntentDetector,
    confirmations: Arc<ConfirmationBroker>,
    fallback: FallbackExecutor,
    public_url: String,
    reaper_interval: Duration,
    reaper_grace: Duration,
}

impl McpHost {
    /// Build with the server registry and token store persisted under the
    /// configured data directory.
    pub fn from_config(config: &ToolgateConfig) -> anyhow::Result<Self> {
        let data_dir = toolgate_config::data_dir(config);
        let servers = ServerStore::open(data_dir.join(SERVERS_FILE))?;
        let tokens = TokenStore::open(data_dir.join(TOKENS_FILE))?;
        info!(data_dir = %data_dir.display(), "opened toolgate stores");
        Self::assemble(config, SystemClock::shared(), servers, tokens)
    }

    /// Build with nothing persisted.
    pub fn in_memory(config: &ToolgateConfig, clock: SharedClock) -> anyhow::Result<Self> {
        Self::assemble(config, clock, ServerStore::in_memory(), TokenStore::in_memory())
    }

    fn assemble(
        config: &ToolgateConfig,
        clock: SharedClock,
        servers: ServerStore,
        tokens: TokenStore,
    ) -> anyhow::Result<Self> {
        let connector = Arc::new(TransportConnector::new(CallTimeouts::from(&config.timeouts))?);
        let probe: Arc<dyn HealthProbe> = Arc::clone(&connector) as Arc<dyn HealthProbe>;
        let oauth_client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .timeout(config.timeouts.read())
            .build()?;

        Ok(Self {
            servers,
            tools: ToolRegistry::new(
                config.tools.cache_ttl_secs.map(Duration::from_secs),
                Arc::clone(&clock),
            ),
            health: HealthChecker::new(probe, HealthSettings::from(&config.health), Arc::clone(&clock)),
            oauth: OAuthTokenManager::new(&config.oauth, tokens, oauth_client, Arc::clone(&clock)),
            detector: IntentDetector::from_config(&config.intent)?,
            confirmations: Arc::new(ConfirmationBroker::from_config(
                &config.confirmations,
                clock,
            )),
            fallback: FallbackExecutor::from_config(&config.smtp),
            public_url: config
                .server
                .public_url
                .clone()
                .unwrap_or_else(|| format!("http://{}:{}", config.server.bind, config.server.port)),
            reaper_interval: Duration::from_secs(config.confirmations.reaper_interval_secs.max(1)),
            reaper_grace: Duration::from_secs(config.confirmations.reaper_grace_secs),
            connector,
        })
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackExecutor) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn with_oauth(mut self, oauth: OAuthTokenManager) -> Self {
        self.oauth = oauth;
        self
    }

    #[must_use]
    pub fn servers(&self) -> &ServerStore {
        &self.servers
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthTokenManager {
        &self.oauth
    }

    #[must_use]
    pub fn confirmations(&self) -> &Arc<ConfirmationBroker> {
        &self.confirmations
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<TransportConnector> {
        &self.connector
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    // ── Servers ──────────────────────────────────────────────────────────────

    pub fn register_server(&self, owner_id: &str, record: ServerRecord) -> Result<ServerConfig> {
        let config = record.into_config(owner_id)?;
        self.servers.upsert(config.clone())?;
        // A changed endpoint invalidates whatever we knew about the old one.
        self.tools.remove_server(&config.id);
        self.health.invalidate(&config.id);
        Ok(config)
    }

    #[must_use]
    pub fn list_servers(&self, owner_id: &str) -> Vec<ServerConfig> {
        self.servers.list_for_owner(owner_id)
    }

    /// A server owned by `owner_id`. Foreign servers are reported as missing.
    pub fn server_for(&self, owner_id: &str, server_id: &str) -> Result<ServerConfig> {
        self.servers
            .get(server_id)
            .filter(|server| server.owner_id == owner_id)
            .ok_or_else(|| toolgate_mcp::Error::ServerNotFound(server_id.to_string()).into())
    }

    /// Delete a server and everything cached or stored for it.
    pub async fn remove_server(&self, owner_id: &str, server_id: &str) -> Result<RemovalReport> {
        self.servers.remove(server_id, owner_id)?;
        self.connector.close_server(server_id).await;
        let tools_dropped = self.tools.remove_server(server_id);
        self.health.invalidate(server_id);
        let tokens_revoked = self.oauth.revoke_server(server_id)?;
        let confirmations_dropped = self.confirmations.remove_for_server(server_id);
        info!(
            server_id,
            tools_dropped, tokens_revoked, confirmations_dropped, "MCP server removed"
        );
        Ok(RemovalReport {
            server_id: server_id.to_string(),
            tools_dropped,
            tokens_revoked,
            confirmations_dropped,
        })
    }

    pub async fn discover_tools(
        &self,
        owner_id: &str,
        server_id: &str,
        refresh: bool,
    ) -> Result<Arc<[ToolDescriptor]>> {
        let server = self.server_for(owner_id, server_id)?;
        let options = self.call_options(owner_id, &server, None).await?;
        let listed = if refresh {
            self.tools.refresh(&self.connector, &server, &options).await
        } else {
            self.tools.tools_for(&self.connector, &server, &options).await
        };
        listed.map_err(|e| self.map_mcp(&server, e))
    }

    pub async fn check_health(&self, owner_id: &str, server_id: &str) -> Result<HealthCheckResult> {
        let server = self.server_for(owner_id, server_id)?;
        Ok(self.health.check(&server).await)
    }

    // ── Messages and confirmations ───────────────────────────────────────────

    #[must_use]
    pub fn detect(&self, user_id: &str, message: &str) -> Option<IntentMatch> {
        self.detector.detect(message, &self.servers.list_for_owner(user_id))
    }

    /// Route a chat message: resolve a confirmation reply, or detect an
    /// intent and issue a confirmation (or the setup guide).
    pub fn handle_message(&self, user_id: &str, message: &str) -> Result<MessageOutcome> {
        if let Some((action, confirmation_id)) = parse_confirmation_command(message) {
            return self
                .resolve_confirmation(user_id, &confirmation_id, action)
                .map(MessageOutcome::Resolved);
        }

        let Some(intent) = self.detect(user_id, message) else {
            return Ok(MessageOutcome::NoIntent);
        };
        debug!(user_id, intent = %intent.kind, confidence = intent.confidence, "intent detected");

        if !intent.has_servers() {
            let prompt = prompts::setup_guide(&intent);
            return Ok(MessageOutcome::SetupRequired { intent, prompt });
        }

        let confirmation =
            self.confirmations
                .create(user_id, intent.kind, message, intent.matched_servers);
        let prompt = prompts::confirmation_request(&confirmation);
        Ok(MessageOutcome::ConfirmationRequired {
            confirmation,
            prompt,
        })
    }

    pub fn resolve_confirmation(
        &self,
        user_id: &str,
        confirmation_id: &str,
        action: ConfirmationAction,
    ) -> Result<Resolution> {
        match self
            .confirmations
            .resolve_for(user_id, confirmation_id, action)
        {
            Ok(confirmation) => {
                let notice = match confirmation.status {
                    ConfirmationStatus::Confirmed => prompts::execution_notice(&confirmation),
                    _ => prompts::cancellation_notice(&confirmation),
                };
                Ok(Resolution {
                    confirmation,
                    notice,
                })
            },
            Err(source) => {
                let intent = self
                    .confirmations
                    .get(confirmation_id)
                    .filter(|record| record.user_id == user_id)
                    .map(|record| record.intent_kind);
                Err(HostError::Confirmation { source, intent })
            },
        }
    }

    /// Tools offered by a confirmed record's candidate servers. Servers that
    /// fail discovery are skipped.
    pub async fn candidate_tools(
        &self,
        user_id: &str,
        confirmation: &ConfirmationRecord,
    ) -> Vec<ToolDescriptor> {
        let mut tools = Vec::new();
        for candidate in &confirmation.candidate_servers {
            match self.discover_tools(user_id, &candidate.id, false).await {
                Ok(found) => tools.extend(found.iter().cloned()),
                Err(e) => {
                    warn!(server_id = %candidate.id, error = %e, "skipping server during tool discovery");
                },
            }
        }
        tools
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Health gate, primary call, then fallback.
    ///
    /// The health gate only applies to Pipedream servers. Transport errors
    /// were already retried once inside the connector; timeouts are not.
    pub async fn execute_tool(
        &self,
        user_id: &str,
        request: ToolRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionOutcome> {
        let server = self.server_for(user_id, &request.server_id)?;
        let intent = request.intent.or_else(|| intent_for_tool(&request.tool));

        if server.transport == TransportKind::Pipedream {
            let health = self.health.check(&server).await;
            if !health.healthy {
                let original = HostError::Unhealthy {
                    server_id: server.id.clone(),
                    reason: health
                        .error
                        .unwrap_or_else(|| "health check failed".to_string()),
                };
                return self.fall_back(&server, &request, intent, original).await;
            }
        }

        let options = self.call_options(user_id, &server, cancel).await?;
        match self.call_primary(&server, &request, &options).await {
            Ok(result) => {
                let verification = match intent {
                    Some(IntentKind::Email) => result
                        .find_field(&["message_id", "id"])
                        .map_or(Verification::Unverified, |message_id| Verification::Verified {
                            message_id,
                        }),
                    _ => Verification::NotApplicable,
                };
                if verification == Verification::Unverified {
                    warn!(server_id = %server.id, tool = %request.tool, "email result carries no message id");
                }
                Ok(ExecutionOutcome {
                    server_id: server.id,
                    tool: request.tool,
                    path: ExecutionPath::Primary,
                    verification,
                    text: result.text(),
                    result: Some(result),
                    fallback: None,
                })
            },
            Err(e) if e.kind().triggers_fallback() => self.fall_back(&server, &request, intent, e).await,
            Err(e) => Err(e),
        }
    }

    async fn call_primary(
        &self,
        server: &ServerConfig,
        request: &ToolRequest,
        options: &CallOptions,
    ) -> Result<ToolsCallResult> {
        let tools = self
            .tools
            .tools_for(&self.connector, server, options)
            .await
            .map_err(|e| self.map_mcp(server, e))?;
        let descriptor = tools
            .iter()
            .find(|tool| tool.name == request.tool)
            .ok_or_else(|| toolgate_mcp::Error::ToolNotFound {
                tool: request.tool.clone(),
                server: Some(server.id.clone()),
            })?;

        let arguments = if server.transport == TransportKind::Pipedream {
            pipedream::enhance_arguments(&request.tool, request.arguments.clone())
        } else {
            request.arguments.clone()
        };
        validate_arguments(descriptor, &arguments)?;

        self.connector
            .call_tool(server, &request.tool, arguments, options)
            .await
            .map_err(|e| self.map_mcp(server, e))
    }

    async fn fall_back(
        &self,
        server: &ServerConfig,
        request: &ToolRequest,
        intent: Option<IntentKind>,
        original: HostError,
    ) -> Result<ExecutionOutcome> {
        let Some(kind) = intent.filter(|kind| self.fallback.has_strategy(*kind)) else {
            return Err(original);
        };
        warn!(
            server_id = %server.id,
            tool = %request.tool,
            error = %original,
            "primary path failed, using fallback"
        );
        match self.fallback.execute(kind, &request.arguments).await {
            Ok(action) => Ok(ExecutionOutcome {
                server_id: server.id.clone(),
                tool: request.tool.clone(),
                path: ExecutionPath::Fallback,
                verification: action
                    .message_id
                    .clone()
                    .map_or(Verification::Unverified, |message_id| Verification::Verified {
                        message_id,
                    }),
                text: action.message.clone(),
                result: None,
                fallback: Some(action),
            }),
            Err(fallback) => Err(HostError::FallbackFailed {
                original: Box::new(original),
                fallback: Box::new(fallback),
            }),
        }
    }

    /// Auth headers for a call. Pipedream servers run their own OAuth, so a
    /// missing token there only means no header is sent.
    async fn call_options(
        &self,
        user_id: &str,
        server: &ServerConfig,
        cancel: Option<CancellationToken>,
    ) -> Result<CallOptions> {
        let headers = match server.auth.provider() {
            Some(provider) if self.oauth.is_configured(provider) => {
                match self.oauth.auth_headers(user_id, &server.id, provider).await {
                    Ok(headers) => headers,
                    Err(e)
                        if e.kind() == ErrorKind::ReauthRequired
                            && server.transport == TransportKind::Pipedream =>
                    {
                        debug!(server_id = %server.id, "no OAuth token, Pipedream handles auth");
                        Vec::new()
                    },
                    Err(e) if e.kind() == ErrorKind::ReauthRequired => {
                        return Err(self.reauth(server, &provider.display_name()));
                    },
                    Err(e) => return Err(e.into()),
                }
            },
            Some(provider) => {
                debug!(server_id = %server.id, provider = %provider, "provider not configured, calling without OAuth header");
                Vec::new()
            },
            None => Vec::new(),
        };
        let options = CallOptions::with_headers(headers);
        Ok(match cancel {
            Some(token) => options.cancel_on(token),
            None => options,
        })
    }

    fn map_mcp(&self, server: &ServerConfig, error: toolgate_mcp::Error) -> HostError {
        match error {
            toolgate_mcp::Error::ReauthRequired { provider } => {
                let provider = provider
                    .or_else(|| server.auth.provider().map(Provider::display_name))
                    .unwrap_or_else(|| server.name.clone());
                self.reauth(server, &provider)
            },
            other => other.into(),
        }
    }

    fn reauth(&self, server: &ServerConfig, provider: &str) -> HostError {
        HostError::ReauthRequired {
            provider: provider.to_string(),
            server_id: server.id.clone(),
            authorize_url: self.authorize_url(&server.id, server.auth.provider()),
        }
    }

    // ── OAuth ────────────────────────────────────────────────────────────────

    /// Link the user follows to (re-)authorize a server.
    #[must_use]
    pub fn authorize_url(&self, server_id: &str, provider: Option<&Provider>) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("server_id", server_id);
        if let Some(provider) = provider {
            query.append_pair("provider", provider.as_str());
        }
        format!(
            "{}/api/oauth/authorize?{}",
            self.public_url.trim_end_matches('/'),
            query.finish()
        )
    }

    /// The provider a server authenticates against: configured, else inferred.
    #[must_use]
    pub fn provider_for(&self, server: &ServerConfig) -> Option<Provider> {
        server
            .auth
            .provider()
            .cloned()
            .or_else(|| detect_provider(&server.endpoint, server.description.as_deref()))
    }

    /// Redeem the callback and drop the stale health entry for the server.
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<OAuthToken> {
        let token = self.oauth.complete_authorization(code, state).await?;
        self.health.invalidate(&token.server_id);
        Ok(token)
    }

    /// Delete the user's tokens for a server, for one provider or all.
    pub fn revoke_authorization(
        &self,
        user_id: &str,
        server_id: &str,
        provider: Option<&Provider>,
    ) -> Result<usize> {
        let providers: Vec<Provider> = match provider {
            Some(provider) => vec![provider.clone()],
            None => self
                .oauth
                .tokens()
                .list_for_user(user_id)
                .into_iter()
                .filter(|token| token.server_id == server_id)
                .map(|token| token.provider)
                .collect(),
        };
        for provider in &providers {
            self.oauth.revoke(user_id, server_id, provider)?;
        }
        Ok(providers.len())
    }

    #[must_use]
    pub fn authorization_status(&self, user_id: &str) -> Vec<AuthorizationStatus> {
        self.oauth
            .status(user_id)
            .into_iter()
            .map(|status| AuthorizationStatus {
                server_name: self.servers.get(&status.server_id).map(|s| s.name),
                server_id: status.server_id,
                provider: status.provider,
                is_valid: status.is_valid,
                expires_at: status.expires_at,
                scope: status.scope,
            })
            .collect()
    }

    // ── Background work ──────────────────────────────────────────────────────

    /// Start the confirmation reaper and the OAuth state purge loop.
    pub fn spawn_maintenance(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let reaper = Arc::clone(&self.confirmations).spawn_reaper(
            self.reaper_interval,
            self.reaper_grace,
            cancel.clone(),
        );

        let host = Arc::clone(self);
        let interval = self.reaper_interval;
        let purge = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        host.oauth.purge_expired_states();
                    },
                }
            }
        });
        vec![reaper, purge]
    }

    pub async fn shutdown(&self) {
        self.connector.shutdown().await;
    }
}

/// Best-effort intent for a bare tool name, used to pick a fallback.
fn intent_for_tool(tool: &str) -> Option<IntentKind> {
    let tool = tool.to_ascii_lowercase();
    ["gmail", "email", "mail", "outlook"]
        .iter()
        .any(|hint| tool.contains(hint))
        .then_some(IntentKind::Email)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, toolgate_common::ManualClock};

    fn host() -> McpHost {
        McpHost::in_memory(&ToolgateConfig::default(), ManualClock::starting_now()).unwrap()
    }

    #[test]
    fn infers_email_from_tool_name() {
        assert_eq!(intent_for_tool("gmail-send-email"), Some(IntentKind::Email));
        assert_eq!(intent_for_tool("Send_Mail"), Some(IntentKind::Email));
        assert_eq!(intent_for_tool("list_files"), None);
    }

    #[test]
    fn authorize_url_is_encoded() {
        let host = host();
        let url = host.authorize_url("my server", Some(&Provider::gmail()));
        assert_eq!(
            url,
            "http://127.0.0.1:8787/api/oauth/authorize?server_id=my+server&provider=gmail"
        );
    }

    #[test]
    fn small_talk_has_no_intent() {
        let host = host();
        assert!(matches!(
            host.handle_message("u1", "hello there").unwrap(),
            MessageOutcome::NoIntent
        ));
    }

    #[test]
    fn intent_without_servers_yields_setup_guide() {
        let host = host();
        match host.handle_message("u1", "send an email to bob").unwrap() {
            MessageOutcome::SetupRequired { intent, prompt } => {
                assert_eq!(intent.kind, IntentKind::Email);
                assert!(prompt.contains("Email Setup Required"));
            },
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn foreign_servers_are_not_found() {
        let host = host();
        host.register_server(
            "u1",
            serde_json::from_value(serde_json::json!({
                "id": "s1",
                "name": "Gmail",
                "config": {"type": "custom", "uri": "https://mcp.pipedream.net/abc/gmail"}
            }))
            .unwrap(),
        )
        .unwrap();
        assert!(host.server_for("u1", "s1").is_ok());
        let err = host.server_for("u2", "s1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerNotFound);
    }
}
