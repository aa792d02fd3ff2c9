//! Cross-crate error taxonomy.
//!
//! Every component error maps onto one [`ErrorKind`] so the calling chat
//! layer can branch on the category without matching concrete error types.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The remote endpoint could not be reached or refused the connection.
    ConnectionRefused,
    /// An established connection broke mid-request.
    ConnectionLost,
    /// The call budget elapsed before a response arrived.
    Timeout,
    /// The peer answered with something that is not valid JSON-RPC.
    InvalidResponse,
    ServerNotFound,
    ToolNotFound,
    /// The remote tool reported an error result.
    ToolFailed,
    SchemaValidationFailed,
    ReauthRequired,
    InvalidState,
    StateExpired,
    ConfirmationNotFound,
    ConfirmationExpired,
    ConfirmationAlreadyResolved,
    FallbackFailed,
    /// The health gate refused the call and no fallback applies.
    Unhealthy,
    Cancelled,
    Configuration,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionLost => "connection_lost",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::ServerNotFound => "server_not_found",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolFailed => "tool_failed",
            Self::SchemaValidationFailed => "schema_validation_failed",
            Self::ReauthRequired => "reauth_required",
            Self::InvalidState => "invalid_state",
            Self::StateExpired => "state_expired",
            Self::ConfirmationNotFound => "confirmation_not_found",
            Self::ConfirmationExpired => "confirmation_expired",
            Self::ConfirmationAlreadyResolved => "confirmation_already_resolved",
            Self::FallbackFailed => "fallback_failed",
            Self::Unhealthy => "unhealthy",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Transport-level failures that warrant one transparent retry on a
    /// fresh connection.
    #[must_use]
    pub fn is_transport(self) -> bool {
        matches!(self, Self::ConnectionRefused | Self::ConnectionLost)
    }

    /// Failures that should trigger the fallback path for the request.
    #[must_use]
    pub fn triggers_fallback(self) -> bool {
        self.is_transport() || matches!(self, Self::Timeout | Self::Unhealthy)
    }

    /// Failures that can only be cleared by the user (re-authenticate,
    /// re-issue the message). These are never retried automatically.
    #[must_use]
    pub fn needs_user_action(self) -> bool {
        matches!(
            self,
            Self::ReauthRequired
                | Self::InvalidState
                | Self::StateExpired
                | Self::ConfirmationNotFound
                | Self::ConfirmationExpired
                | Self::ConfirmationAlreadyResolved
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an error onto the shared taxonomy.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
