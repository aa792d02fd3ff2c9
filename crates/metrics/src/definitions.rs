//! Metric names, grouped by component.

/// Transport connector and tool calls.
pub mod mcp {
    pub const TOOL_CALLS_TOTAL: &str = "toolgate_mcp_tool_calls_total";
    pub const TOOL_CALL_DURATION_SECONDS: &str = "toolgate_mcp_tool_call_duration_seconds";
    pub const TOOL_CALL_ERRORS_TOTAL: &str = "toolgate_mcp_tool_call_errors_total";
    pub const TOOL_CALL_RETRIES_TOTAL: &str = "toolgate_mcp_tool_call_retries_total";
    pub const CONNECTIONS_OPENED_TOTAL: &str = "toolgate_mcp_connections_opened_total";
    pub const CONNECTIONS_EVICTED_TOTAL: &str = "toolgate_mcp_connections_evicted_total";
    pub const TOOLS_DISCOVERED_TOTAL: &str = "toolgate_mcp_tools_discovered_total";
}

/// Health checker.
pub mod health {
    pub const PROBES_TOTAL: &str = "toolgate_health_probes_total";
    pub const CACHE_HITS_TOTAL: &str = "toolgate_health_cache_hits_total";
    pub const UNHEALTHY_TOTAL: &str = "toolgate_health_unhealthy_total";
    pub const PROBE_DURATION_SECONDS: &str = "toolgate_health_probe_duration_seconds";
}

/// OAuth token manager.
pub mod oauth {
    pub const FLOW_STARTS_TOTAL: &str = "toolgate_oauth_flow_starts_total";
    pub const FLOW_COMPLETIONS_TOTAL: &str = "toolgate_oauth_flow_completions_total";
    pub const CODE_EXCHANGE_ERRORS_TOTAL: &str = "toolgate_oauth_code_exchange_errors_total";
    pub const TOKEN_REFRESH_TOTAL: &str = "toolgate_oauth_token_refresh_total";
    pub const TOKEN_REFRESH_FAILURES_TOTAL: &str = "toolgate_oauth_token_refresh_failures_total";
    pub const INVALID_STATE_TOTAL: &str = "toolgate_oauth_invalid_state_total";
}

/// Confirmation broker.
pub mod confirmations {
    pub const CREATED_TOTAL: &str = "toolgate_confirmations_created_total";
    pub const RESOLVED_TOTAL: &str = "toolgate_confirmations_resolved_total";
    pub const EXPIRED_TOTAL: &str = "toolgate_confirmations_expired_total";
    pub const REAPED_TOTAL: &str = "toolgate_confirmations_reaped_total";
}

/// Fallback executor.
pub mod fallback {
    pub const EXECUTIONS_TOTAL: &str = "toolgate_fallback_executions_total";
    pub const FAILURES_TOTAL: &str = "toolgate_fallback_failures_total";
}

/// Histogram buckets.
pub mod buckets {
    /// Tool calls range from sub-second to the five minute read budget.
    pub const TOOL_CALL_DURATION: [f64; 12] = [
        0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
    ];
    pub const PROBE_DURATION: [f64; 8] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0];
}
