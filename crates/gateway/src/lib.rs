//! The toolgate host service and its HTTP surface.
//!
//! [`McpHost`] wires intent detection, confirmations, OAuth, transports,
//! tool discovery, health gating and fallback into one pipeline.
//! [`server`] exposes the OAuth routes, `/health` and `/metrics`.

pub mod error;
pub mod host;
pub mod oauth_routes;
pub mod server;

pub use {
    error::{HostError, Result},
    host::{
        AuthorizationStatus, ExecutionOutcome, ExecutionPath, McpHost, MessageOutcome,
        RemovalReport, Resolution, ToolRequest, Verification,
    },
    server::{AppState, build_app, start_server},
};
