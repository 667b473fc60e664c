use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use tracing::warn;

/// Failures starting or running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned to HTTP callers as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("driver '{0}' not found")]
    DriverNotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Plugin(#[from] volbroker_plugins::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::DriverNotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Plugin(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "driver call failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
