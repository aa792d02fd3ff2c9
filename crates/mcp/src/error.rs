use std::{error::Error as StdError, time::Duration};

use toolgate_common::{Classify, ErrorKind, FromMessage};

use crate::types::JsonRpcError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection to {target} refused: {reason}")]
    ConnectionRefused { target: String, reason: String },
    #[error("connection to {target} lost: {reason}")]
    ConnectionLost { target: String, reason: String },
    #[error("'{method}' timed out after {}s", .after.as_secs())]
    Timeout { method: String, after: Duration },
    #[error("invalid response to '{method}': {reason}")]
    InvalidResponse { method: String, reason: String },
    #[error("MCP server '{0}' not found")]
    ServerNotFound(String),
    #[error("tool '{tool}' not found{}", .server.as_deref().map(|s| format!(" on server '{s}'")).unwrap_or_default())]
    ToolNotFound { tool: String, server: Option<String> },
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },
    #[error("arguments for '{tool}' are invalid: {}", .errors.join("; "))]
    SchemaValidation { tool: String, errors: Vec<String> },
    #[error("server requires re-authentication{}", .provider.as_deref().map(|p| format!(" with {p}")).unwrap_or_default())]
    ReauthRequired { provider: Option<String> },
    #[error("JSON-RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),
    #[error("call cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn invalid(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn lost(target: &str, reason: impl ToString) -> Self {
        Self::ConnectionLost {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Map a reqwest failure onto the taxonomy.
    pub(crate) fn from_reqwest(
        target: &str,
        method: &str,
        err: reqwest::Error,
        budget: Duration,
    ) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                method: method.to_string(),
                after: budget,
            }
        } else if err.is_connect() {
            Self::ConnectionRefused {
                target: target.to_string(),
                reason: err.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            Self::invalid(method, err.to_string())
        } else {
            Self::lost(target, err)
        }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionRefused { .. } => ErrorKind::ConnectionRefused,
            Self::ConnectionLost { .. } | Self::Io(_) => ErrorKind::ConnectionLost,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidResponse { .. } | Self::SerdeJson(_) => ErrorKind::InvalidResponse,
            Self::ServerNotFound(_) => ErrorKind::ServerNotFound,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::ToolFailed { .. } | Self::Rpc(_) => ErrorKind::ToolFailed,
            Self::SchemaValidation { .. } => ErrorKind::SchemaValidationFailed,
            Self::ReauthRequired { .. } => ErrorKind::ReauthRequired,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::UrlParse(_) => ErrorKind::Configuration,
            Self::Message { .. } | Self::External { .. } => ErrorKind::Internal,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

toolgate_common::impl_context!();
