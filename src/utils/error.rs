// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Error Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   Global error type for the proxy. Every error that can cross the HTTP
//   boundary maps onto a Matrix-style errcode JSON body here.
//
// =============================================================================

use std::io;

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

/// Syncwave global error type
#[derive(Debug, Error)]
pub enum Error {
    /// The client sent something we cannot act on. The offending field is
    /// named in the message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The connection can no longer serve incremental responses; the client
    /// must drop its `pos` and start again.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The upstream homeserver rejected the client's credentials.
    #[error("Upstream auth failure: {0}")]
    UpstreamAuth(String),

    /// The upstream homeserver is unreachable or answered garbage.
    #[error("Upstream transport failure: {0}")]
    UpstreamTransport(String),

    #[error("Configuration error: {0}")]
    BadConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn session_expired(msg: impl Into<String>) -> Self {
        Error::SessionExpired(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::UpstreamTransport(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, errcode, message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, "M_INVALID_PARAM", msg),
            Error::SessionExpired(msg) => (StatusCode::BAD_REQUEST, "M_UNKNOWN_POS", msg),
            Error::UpstreamAuth(msg) => (StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", msg),
            Error::UpstreamTransport(msg) => (StatusCode::BAD_GATEWAY, "M_UNKNOWN", msg),
            Error::BadConfig(msg) | Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "M_UNKNOWN", msg)
            }
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "M_UNKNOWN", err.to_string()),
        };

        (
            status,
            Json(serde_json::json!({
                "errcode": errcode,
                "error": message,
            })),
        )
            .into_response()
    }
}

/// Syncwave global result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let error = Error::bad_request("rooms[0]: lo > hi");
        assert!(error.to_string().contains("Bad request"));
        assert!(error.to_string().contains("rooms[0]"));
    }

    #[test]
    fn test_session_expired_error() {
        let error = Error::session_expired("pos 3 is older than the retention window");
        assert!(error.to_string().contains("Session expired"));
    }

    #[test]
    fn test_http_mapping() {
        let response = Error::session_expired("stale pos").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = Error::UpstreamAuth("bad token".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = Error::UpstreamTransport("connection refused".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
