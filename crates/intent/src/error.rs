use std::error::Error as StdError;

use toolgate_common::{Classify, ErrorKind, FromMessage};

use crate::confirm::ConfirmationStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("confirmation '{0}' not found")]
    NotFound(String),
    #[error("confirmation '{0}' has expired")]
    Expired(String),
    #[error("confirmation '{id}' was already {status}")]
    AlreadyResolved {
        id: String,
        status: ConfirmationStatus,
    },
    #[error("invalid intent pattern: {0}")]
    Pattern(#[from] regex::Error),
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
            Self::NotFound(_) => ErrorKind::ConfirmationNotFound,
            Self::Expired(_) => ErrorKind::ConfirmationExpired,
            Self::AlreadyResolved { .. } => ErrorKind::ConfirmationAlreadyResolved,
            Self::Pattern(_) => ErrorKind::Configuration,
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
