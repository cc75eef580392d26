//! The single error type surfaced across the beacon codec, registry,
//! notification pipeline, and manager lifecycle.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(thiserror::Error, Debug)]
pub enum ThaliError {
    #[error("argument out of range: {0}")]
    ArgumentRange(String),

    #[error("required argument was null: {0}")]
    ArgumentNull(String),

    #[error("malformed beacon-stream preamble: {0}")]
    MalformedPreamble(String),

    #[error("malformed beacon: {0}")]
    MalformedBeacon(String),

    #[error("Call Start!")]
    NotStarted,

    #[error("Call Stop!")]
    AlreadyStarted,

    #[error("peer not available: {0}")]
    PeerNotAvailable(String),

    #[error("radio turned off: {0}")]
    RadioTurnedOff(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Maps lifecycle/codec errors to HTTP status codes the way the teacher's
/// tauri commands map `anyhow::Error` to a `String` at the command boundary,
/// generalized to a typed mapping instead of stringly-typed errors.
impl IntoResponse for ThaliError {
    fn into_response(self) -> Response {
        let status = match &self {
            ThaliError::ArgumentRange(_)
            | ThaliError::ArgumentNull(_)
            | ThaliError::MalformedPreamble(_)
            | ThaliError::MalformedBeacon(_) => StatusCode::BAD_REQUEST,
            ThaliError::PeerNotAvailable(_) => StatusCode::NOT_FOUND,
            ThaliError::NotStarted | ThaliError::AlreadyStarted => StatusCode::CONFLICT,
            ThaliError::RadioTurnedOff(_) => StatusCode::SERVICE_UNAVAILABLE,
            ThaliError::Io(_) | ThaliError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ThaliError>;
