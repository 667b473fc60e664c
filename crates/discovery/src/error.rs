use std::{error::Error as StdError, path::PathBuf};

use volbroker_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configured search directory exists but cannot be listed.
    #[error("cannot read search path {path}: {source}")]
    SearchPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid spec file {path}: {reason}")]
    InvalidSpec { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Plugin(#[from] volbroker_plugins::Error),
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
    pub fn invalid_spec(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

volbroker_common::impl_context!();
