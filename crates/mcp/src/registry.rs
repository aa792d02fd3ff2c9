//! Server configurations: the typed [`ServerConfig`], ingestion from the
//! externally persisted [`ServerRecord`] shape, and a JSON-backed store.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use {
    serde::{Deserialize, Serialize},
    toolgate_oauth::{Provider, detect_provider},
    tracing::{debug, info},
};

use crate::{
    error::{Context, Error, Result},
    pipedream::is_pipedream_url,
};

/// Wire dialect used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    WebSocket,
    Stdio,
    Sse,
    Pipedream,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Pipedream => "pipedream",
        }
    }

    /// Transports that keep a live connection and need the MCP handshake.
    #[must_use]
    pub fn is_stateful(self) -> bool {
        matches!(self, Self::WebSocket | Self::Stdio | Self::Sse)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthRequirement {
    #[default]
    None,
    #[serde(rename = "oauth")]
    OAuth { provider: Provider },
}

impl AuthRequirement {
    #[must_use]
    pub fn provider(&self) -> Option<&Provider> {
        match self {
            Self::None => None,
            Self::OAuth { provider } => Some(provider),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub transport: TransportKind,
    /// URL, or the command line for stdio servers.
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthRequirement,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// Program and arguments for a stdio server.
    pub fn command_line(&self) -> Result<(String, Vec<String>)> {
        let mut parts = self.endpoint.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .with_context(|| format!("server '{}' has an empty command", self.id))?;
        Ok((program, parts.collect()))
    }
}

/// Server configuration as persisted by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub config: RecordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    #[serde(default)]
    pub transport: Option<String>,
}

impl ServerRecord {
    pub fn into_config(self, owner_id: &str) -> Result<ServerConfig> {
        let uri = self.config.uri.trim().to_string();
        let kind = self.config.kind.to_ascii_lowercase();
        let transport = match kind.as_str() {
            "custom" | "http" if is_pipedream_url(&uri) => TransportKind::Pipedream,
            "custom" | "http" => TransportKind::Http,
            "stdio" => TransportKind::Stdio,
            "websocket" | "ws" => TransportKind::WebSocket,
            "sse" => TransportKind::Sse,
            other => match self.config.transport.as_deref() {
                Some("stdio") => TransportKind::Stdio,
                Some("websocket") => TransportKind::WebSocket,
                Some("sse") => TransportKind::Sse,
                Some("http") if is_pipedream_url(&uri) => TransportKind::Pipedream,
                Some("http") => TransportKind::Http,
                _ => {
                    return Err(Error::message(format!(
                        "server '{}' has unsupported type '{other}'",
                        self.id
                    )));
                },
            },
        };
        let auth = match detect_provider(&uri, self.description.as_deref()) {
            Some(provider) => AuthRequirement::OAuth { provider },
            None => AuthRequirement::None,
        };
        Ok(ServerConfig {
            id: self.id,
            owner_id: owner_id.to_string(),
            name: self.name,
            description: self.description,
            transport,
            endpoint: uri,
            auth,
            env: HashMap::new(),
        })
    }
}

/// Server configurations, optionally persisted to `servers.json`.
#[derive(Debug, Default)]
pub struct ServerStore {
    servers: RwLock<BTreeMap<String, ServerConfig>>,
    path: Option<PathBuf>,
}

impl ServerStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from a JSON file, or start empty if the file doesn't exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let servers = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read server store {}", path.display()))?;
            serde_json::from_str(&data)?
        } else {
            debug!(path = %path.display(), "server store not found, using empty");
            BTreeMap::new()
        };
        Ok(Self {
            servers: RwLock::new(servers),
            path: Some(path),
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ServerConfig> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ServerConfig> {
        self.read().values().cloned().collect()
    }

    #[must_use]
    pub fn list_for_owner(&self, owner_id: &str) -> Vec<ServerConfig> {
        self.read()
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Insert or replace a server. Only the owner may replace an existing one.
    pub fn upsert(&self, config: ServerConfig) -> Result<()> {
        let mut servers = self.write();
        if let Some(existing) = servers.get(&config.id)
            && existing.owner_id != config.owner_id
        {
            return Err(Error::ServerNotFound(config.id));
        }
        info!(server_id = %config.id, transport = %config.transport, "saving MCP server");
        servers.insert(config.id.clone(), config);
        self.persist(&servers)
    }

    /// Remove a server owned by `owner_id`.
    pub fn remove(&self, id: &str, owner_id: &str) -> Result<ServerConfig> {
        let mut servers = self.write();
        match servers.get(id) {
            Some(existing) if existing.owner_id == owner_id => {},
            _ => return Err(Error::ServerNotFound(id.to_string())),
        }
        let removed = servers
            .remove(id)
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;
        info!(server_id = id, "removed MCP server");
        self.persist(&servers)?;
        Ok(removed)
    }

    fn persist(&self, servers: &BTreeMap<String, ServerConfig>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(servers)?)?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, ServerConfig>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, ServerConfig>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(kind: &str, uri: &str, description: Option<&str>) -> ServerRecord {
        ServerRecord {
            id: "srv-1".into(),
            name: "My server".into(),
            description: description.map(str::to_string),
            config: RecordConfig {
                kind: kind.into(),
                uri: uri.into(),
                transport: None,
            },
        }
    }

    #[test]
    fn ingests_record_types() {
        let pd = record("custom", "https://mcp.pipedream.net/abc/gmail", None)
            .into_config("u1")
            .unwrap();
        assert_eq!(pd.transport, TransportKind::Pipedream);
        assert_eq!(pd.auth.provider(), Some(&Provider::gmail()));

        let http = record("custom", "https://tools.example.com/mcp", None)
            .into_config("u1")
            .unwrap();
        assert_eq!(http.transport, TransportKind::Http);
        assert_eq!(http.auth, AuthRequirement::None);

        let stdio = record("stdio", "npx -y @mcp/server-filesystem /tmp", Some("gmail"))
            .into_config("u1")
            .unwrap();
        assert_eq!(stdio.transport, TransportKind::Stdio);
        assert_eq!(stdio.auth, AuthRequirement::None);
        let (program, args) = stdio.command_line().unwrap();
        assert_eq!(program, "npx");
        assert_eq!(args, vec!["-y", "@mcp/server-filesystem", "/tmp"]);

        let ws = record("websocket", "wss://x.example.com", Some("Google Calendar"))
            .into_config("u1")
            .unwrap();
        assert_eq!(ws.transport, TransportKind::WebSocket);
        assert_eq!(ws.auth.provider(), Some(&Provider::google()));

        assert!(record("grpc", "x", None).into_config("u1").is_err());
    }

    #[test]
    fn roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        let config = record("sse", "https://sse.example.com/sse", None)
            .into_config("u1")
            .unwrap();
        ServerStore::open(&path).unwrap().upsert(config.clone()).unwrap();

        let reopened = ServerStore::open(&path).unwrap();
        let loaded = reopened.get("srv-1").unwrap();
        assert_eq!(loaded.transport, config.transport);
        assert_eq!(loaded.endpoint, config.endpoint);
        assert_eq!(loaded, config);
    }

    #[test]
    fn only_owner_may_update_or_remove() {
        let store = ServerStore::in_memory();
        let mine = record("custom", "https://a.example.com", None)
            .into_config("u1")
            .unwrap();
        store.upsert(mine.clone()).unwrap();

        let hijack = ServerConfig {
            owner_id: "u2".into(),
            ..mine.clone()
        };
        assert!(matches!(store.upsert(hijack), Err(Error::ServerNotFound(_))));
        assert!(store.remove("srv-1", "u2").is_err());
        assert_eq!(store.list_for_owner("u1").len(), 1);
        assert_eq!(store.remove("srv-1", "u1").unwrap().id, "srv-1");
        assert!(store.list().is_empty());
    }
}
