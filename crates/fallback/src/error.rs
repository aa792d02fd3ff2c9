use std::error::Error as StdError;

use {
    toolgate_common::{Classify, ErrorKind, FromMessage},
    toolgate_intent::IntentKind,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no fallback is available for {0} requests")]
    NoStrategy(IntentKind),
    #[error("{strategy} fallback is not configured: {reason}")]
    NotConfigured {
        strategy: &'static str,
        reason: String,
    },
    #[error("invalid fallback arguments: {0}")]
    InvalidArguments(String),
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build email: {0}")]
    Email(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
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
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Message { .. } | Self::External { .. } => ErrorKind::Internal,
            _ => ErrorKind::FallbackFailed,
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
