//! The host-level error, aggregating every component error, and its
//! rendering into actionable chat text.

use std::error::Error as StdError;

use {
    toolgate_common::{Classify, ErrorKind, FromMessage},
    toolgate_intent::{IntentKind, prompts},
};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Mcp(#[from] toolgate_mcp::Error),
    #[error(transparent)]
    OAuth(#[from] toolgate_oauth::Error),
    #[error("{source}")]
    Confirmation {
        #[source]
        source: toolgate_intent::Error,
        /// Known when the record still exists, for the expired prompt.
        intent: Option<IntentKind>,
    },
    /// No usable credentials for the server; the user must authorize again.
    #[error("re-authentication with {provider} is required for server '{server_id}'")]
    ReauthRequired {
        provider: String,
        server_id: String,
        authorize_url: String,
    },
    #[error("MCP server '{server_id}' is unhealthy: {reason}")]
    Unhealthy { server_id: String, reason: String },
    /// Both the primary path and the fallback failed. Terminal.
    #[error("primary call failed: {original}; fallback failed: {fallback}")]
    FallbackFailed {
        #[source]
        original: Box<HostError>,
        fallback: Box<toolgate_fallback::Error>,
    },
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl HostError {
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

    /// Text the chat layer shows the user for this failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ReauthRequired {
                provider,
                authorize_url,
                ..
            } => prompts::reauth_prompt(provider, authorize_url),
            Self::Confirmation { source, intent } => match source {
                toolgate_intent::Error::Expired(_) => prompts::expired_notice(*intent),
                toolgate_intent::Error::NotFound(id) => format!(
                    "I couldn't find a pending confirmation with ID `{id}`. Please make your request again."
                ),
                toolgate_intent::Error::AlreadyResolved { status, .. } => {
                    format!("That confirmation was already {status}.")
                },
                other => format!("The confirmation could not be processed: {other}"),
            },
            Self::FallbackFailed { original, fallback } => format!(
                "The request failed and the fallback did not succeed either.\n\n\
                 Primary error: {original}\n\
                 Fallback error: {fallback}"
            ),
            Self::Unhealthy { server_id, .. } => format!(
                "The MCP server '{server_id}' is not responding right now. Please try again later."
            ),
            Self::Mcp(toolgate_mcp::Error::SchemaValidation { tool, errors }) => format!(
                "The arguments for '{tool}' were rejected:\n- {}",
                errors.join("\n- ")
            ),
            other => format!("The request failed: {other}"),
        }
    }
}

impl From<toolgate_intent::Error> for HostError {
    fn from(source: toolgate_intent::Error) -> Self {
        Self::Confirmation {
            source,
            intent: None,
        }
    }
}

impl Classify for HostError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Mcp(e) => e.kind(),
            Self::OAuth(e) => e.kind(),
            Self::Confirmation { source, .. } => source.kind(),
            Self::ReauthRequired { .. } => ErrorKind::ReauthRequired,
            Self::Unhealthy { .. } => ErrorKind::Unhealthy,
            Self::FallbackFailed { .. } => ErrorKind::FallbackFailed,
            Self::Message { .. } | Self::External { .. } => ErrorKind::Internal,
        }
    }
}

impl FromMessage for HostError {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

use HostError as Error;

toolgate_common::impl_context!();

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn fallback_failure_keeps_both_causes() {
        let err = HostError::FallbackFailed {
            original: Box::new(HostError::Mcp(toolgate_mcp::Error::Timeout {
                method: "tools/call".into(),
                after: std::time::Duration::from_secs(1),
            })),
            fallback: Box::new(toolgate_fallback::Error::NoStrategy(IntentKind::Email)),
        };
        assert_eq!(err.kind(), ErrorKind::FallbackFailed);
        let text = err.to_string();
        assert!(text.contains("timed out"));
        assert!(text.contains("no fallback"));
        assert!(err.source().unwrap().to_string().contains("timed out"));
        let shown = err.user_message();
        assert!(shown.contains("Primary error"));
        assert!(shown.contains("Fallback error"));
    }

    #[test]
    fn reauth_prompt_names_provider() {
        let err = HostError::ReauthRequired {
            provider: "Gmail".into(),
            server_id: "s1".into(),
            authorize_url: "http://localhost:8787/api/oauth/authorize?server_id=s1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ReauthRequired);
        let text = err.user_message();
        assert!(text.contains("Re-authenticate with Gmail"));
        assert!(text.contains("server_id=s1"));
    }

    #[test]
    fn expired_confirmation_asks_to_restate() {
        let err = HostError::Confirmation {
            source: toolgate_intent::Error::Expired("c1".into()),
            intent: Some(IntentKind::Email),
        };
        assert_eq!(err.kind(), ErrorKind::ConfirmationExpired);
        assert!(err.user_message().contains("make your request again"));
    }
}
