use {
    async_trait::async_trait,
    serde::Serialize,
    serde_json::Value,
    toolgate_intent::IntentKind,
};

use crate::error::Result;

/// Outcome of a fallback execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub intent: IntentKind,
    /// Name of the strategy that produced the result, e.g. `smtp`.
    pub strategy: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// An alternate path for one intent kind that bypasses the MCP server.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy has what it needs to run at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Run the strategy with the arguments of the failed primary tool call.
    async fn execute(&self, arguments: &Value) -> Result<ActionResult>;
}
