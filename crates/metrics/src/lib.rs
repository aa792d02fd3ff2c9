//! Metrics for toolgate.
//!
//! Component crates record through the `metrics` facade macros re-exported
//! here, using the names in the per-component modules. When the `prometheus`
//! feature is enabled, [`init_metrics`] installs a Prometheus recorder whose
//! output the gateway serves at `/metrics`; otherwise every macro is a no-op.
//!
//! ```rust,ignore
//! use toolgate_metrics::{counter, mcp};
//!
//! counter!(mcp::TOOL_CALLS_TOTAL, "transport" => "http").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
