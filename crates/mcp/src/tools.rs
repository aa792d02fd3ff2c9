//! Discovered tool cache, keyed by server.
//!
//! Entries live until an explicit refresh or server removal. An optional TTL
//! makes [`ToolRegistry::tools_for`] rediscover once an entry is older.

use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    serde::Serialize,
    serde_json::Value,
    toolgate_common::{KeyedLocks, SharedClock},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use toolgate_metrics::{counter, mcp as mcp_metrics};

use crate::{
    connector::{CallOptions, TransportConnector},
    error::{Error, Result},
    registry::ServerConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub server_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Discovery {
    tools: Arc<[ToolDescriptor]>,
    at: DateTime<Utc>,
}

pub struct ToolRegistry {
    entries: DashMap<String, Discovery>,
    /// Bumped by `remove_server`; a discovery that started under an older
    /// generation does not repopulate the cache.
    generations: DashMap<String, u64>,
    refresh_locks: KeyedLocks<String>,
    ttl: Option<chrono::Duration>,
    clock: SharedClock,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(ttl: Option<std::time::Duration>, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            refresh_locks: KeyedLocks::new(),
            ttl: ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()),
            clock,
        }
    }

    /// Cached tools for `server`, discovering them on a miss (or when stale).
    pub async fn tools_for(
        &self,
        connector: &TransportConnector,
        server: &ServerConfig,
        options: &CallOptions,
    ) -> Result<Arc<[ToolDescriptor]>> {
        if let Some(tools) = self.fresh(&server.id) {
            return Ok(tools);
        }
        let _gate = self.refresh_locks.lock(&server.id).await;
        if let Some(tools) = self.fresh(&server.id) {
            return Ok(tools);
        }
        self.discover(connector, server, options).await
    }

    /// Rediscover tools for `server`, replacing the cached set.
    pub async fn refresh(
        &self,
        connector: &TransportConnector,
        server: &ServerConfig,
        options: &CallOptions,
    ) -> Result<Arc<[ToolDescriptor]>> {
        let _gate = self.refresh_locks.lock(&server.id).await;
        self.discover(connector, server, options).await
    }

    async fn discover(
        &self,
        connector: &TransportConnector,
        server: &ServerConfig,
        options: &CallOptions,
    ) -> Result<Arc<[ToolDescriptor]>> {
        let generation = self.generation(&server.id);
        let defs = connector.list_tools(server, options).await?;
        let at = self.clock.now();
        let tools: Arc<[ToolDescriptor]> = defs
            .into_iter()
            .map(|def| ToolDescriptor {
                server_id: server.id.clone(),
                name: def.name,
                description: def.description,
                input_schema: def.input_schema,
                discovered_at: at,
            })
            .collect();
        info!(server_id = %server.id, tools = tools.len(), "discovered MCP tools");

        #[cfg(feature = "metrics")]
        counter!(mcp_metrics::TOOLS_DISCOVERED_TOTAL).increment(tools.len() as u64);

        let current = self.generations.entry(server.id.clone()).or_default();
        if *current == generation {
            self.entries.insert(server.id.clone(), Discovery {
                tools: Arc::clone(&tools),
                at,
            });
        } else {
            debug!(server_id = %server.id, "server removed during discovery, not caching");
        }
        drop(current);
        Ok(tools)
    }

    fn generation(&self, server_id: &str) -> u64 {
        self.generations.get(server_id).map_or(0, |g| *g)
    }

    fn fresh(&self, server_id: &str) -> Option<Arc<[ToolDescriptor]>> {
        let entry = self.entries.get(server_id)?;
        if let Some(ttl) = self.ttl
            && self.clock.now() - entry.at >= ttl
        {
            debug!(server_id, "tool cache entry is stale");
            return None;
        }
        Some(Arc::clone(&entry.tools))
    }

    /// Cached descriptor, without discovery.
    #[must_use]
    pub fn get(&self, server_id: &str, tool: &str) -> Option<ToolDescriptor> {
        self.entries
            .get(server_id)?
            .tools
            .iter()
            .find(|t| t.name == tool)
            .cloned()
    }

    #[must_use]
    pub fn list(&self, server_id: &str) -> Vec<ToolDescriptor> {
        self.entries
            .get(server_id)
            .map(|entry| entry.tools.to_vec())
            .unwrap_or_default()
    }

    /// Resolve a bare tool name against `servers`, in order.
    #[must_use]
    pub fn find(&self, tool: &str, servers: &[ServerConfig]) -> Option<ToolDescriptor> {
        servers.iter().find_map(|server| self.get(&server.id, tool))
    }

    /// Drop every cached tool for a server.
    pub fn remove_server(&self, server_id: &str) -> bool {
        *self.generations.entry(server_id.to_string()).or_default() += 1;
        self.refresh_locks.forget(&server_id.to_string());
        self.entries.remove(server_id).is_some()
    }

    #[must_use]
    pub fn is_cached(&self, server_id: &str) -> bool {
        self.entries.contains_key(server_id)
    }
}

/// Check `arguments` against the tool's input schema.
///
/// A schema that fails to compile is logged and treated as permissive.
pub fn validate_arguments(tool: &ToolDescriptor, arguments: &Value) -> Result<()> {
    let validator = match jsonschema::validator_for(&tool.input_schema) {
        Ok(validator) => validator,
        Err(e) => {
            warn!(server_id = %tool.server_id, tool = %tool.name, error = %e, "unusable input schema");
            return Ok(());
        },
    };
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::SchemaValidation {
            tool: tool.name.clone(),
            errors,
        })
    }
}
