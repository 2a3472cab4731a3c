//! Error types for the HTTP API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for API handlers
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for API handlers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request body was not valid JSON for the expected intent
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The engine failed; orchestrator failures use the route's own status
    #[error("{source}")]
    Engine {
        /// The engine error
        #[source]
        source: kaas_common::Error,
        /// Status for upstream and partial failures at this route
        upstream_status: StatusCode,
    },

    /// Server setup or runtime failure
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Wrap an engine error for a route whose orchestrator failures map to `upstream_status`
    pub fn engine(source: kaas_common::Error, upstream_status: StatusCode) -> Self {
        Self::Engine {
            source,
            upstream_status,
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        use kaas_common::Error as E;
        match self {
            Error::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Error::Engine {
                source,
                upstream_status,
            } => match source {
                E::Validation { .. } => StatusCode::BAD_REQUEST,
                E::Conflict { .. } => StatusCode::CONFLICT,
                E::NotFound { .. } => StatusCode::NOT_FOUND,
                E::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                E::Upstream { .. }
                | E::PartialFailure { .. }
                | E::Kube { .. }
                | E::Serialization { .. }
                | E::Internal { .. } => *upstream_status,
            },
            Error::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
