use std::error::Error as StdError;

use toolgate_common::{Classify, ErrorKind, FromMessage};

use crate::types::Provider;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The state is unknown or was already consumed.
    #[error("invalid or already used OAuth state")]
    InvalidState,
    #[error("OAuth state expired")]
    StateExpired,
    /// No usable token exists; the user has to authorize again.
    #[error("re-authentication with {} is required", .provider.display_name())]
    ReauthRequired { provider: Provider },
    #[error("OAuth provider '{provider}' is not configured")]
    ProviderNotConfigured { provider: Provider },
    #[error("token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
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

    #[must_use]
    pub fn reauth(provider: &Provider) -> Self {
        Self::ReauthRequired {
            provider: provider.clone(),
        }
    }

    /// True for both unknown and expired states.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState | Self::StateExpired)
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState => ErrorKind::InvalidState,
            Self::StateExpired => ErrorKind::StateExpired,
            Self::ReauthRequired { .. } => ErrorKind::ReauthRequired,
            Self::ProviderNotConfigured { .. } => ErrorKind::Configuration,
            Self::Reqwest(e) if e.is_timeout() => ErrorKind::Timeout,
            Self::Reqwest(e) if e.is_connect() => ErrorKind::ConnectionRefused,
            Self::TokenEndpoint { .. } | Self::Reqwest(_) | Self::SerdeJson(_) => {
                ErrorKind::InvalidResponse
            },
            Self::UrlParse(_) => ErrorKind::Configuration,
            Self::Io(_) | Self::Message { .. } | Self::External { .. } => ErrorKind::Internal,
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
