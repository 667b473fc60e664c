use std::error::Error as StdError;

use volbroker_common::FromMessage;

/// Failures reported by a plugin itself, as opposed to transport plumbing.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The driver answered but put a message in its `Err` field.
    #[error("driver '{driver}' returned error: {message}")]
    Driver { driver: String, message: String },

    #[error("plugin '{driver}' is closed")]
    Closed { driver: String },

    #[error("plugin '{driver}' is incompatible: {reason}")]
    Incompatible { driver: String, reason: String },

    #[error("plugin '{driver}' is unreachable at {address}: {message}")]
    Unreachable {
        driver: String,
        address: String,
        message: String,
    },

    #[error("unsupported plugin address '{address}'")]
    UnsupportedAddress { address: String },

    #[error("invalid volume id '{volume_id}'")]
    InvalidVolumeId { volume_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error(transparent)]
    GrpcTransport(#[from] tonic::transport::Error),
    #[error("gRPC call failed: {0}")]
    Status(Box<tonic::Status>),
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

    /// Whether retrying the same call may succeed: the peer could not be
    /// reached at all, so nothing was executed on the driver side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Plugin(PluginError::Unreachable { .. }) => true,
            Self::Status(status) => status.code() == tonic::Code::Unavailable,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Plugin(PluginError::Closed { .. }))
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Self::Status(Box::new(status))
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

volbroker_common::impl_context!();
