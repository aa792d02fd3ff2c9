//! MCP (Model Context Protocol) host support for toolgate.
//!
//! This crate provides:
//! - JSON-RPC 2.0 envelope and MCP payload types (`types`)
//! - One transport per wire dialect: HTTP, Pipedream, SSE, WebSocket, stdio
//! - Connection pooling, timeouts, the single retry and cancellation (`connector`)
//! - Server configurations and their JSON store (`registry`)
//! - The discovered tool cache (`tools`)
//! - Cached health probes (`health`)

pub mod connector;
pub mod error;
pub mod health;
pub mod http_transport;
mod pending;
pub mod pipedream;
pub mod registry;
pub mod sse_transport;
pub mod stdio_transport;
pub mod tools;
pub mod traits;
pub mod types;
pub mod ws_transport;

pub use {
    connector::{CallOptions, CallTimeouts, TransportConnector},
    error::{Error, Result},
    health::{HealthCheckResult, HealthChecker, HealthProbe, HealthSettings},
    registry::{AuthRequirement, RecordConfig, ServerConfig, ServerRecord, ServerStore, TransportKind},
    tools::{ToolDescriptor, ToolRegistry, validate_arguments},
    traits::McpTransport,
    types::{ToolContent, ToolsCallResult},
};
