//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform backend response for client
//! - Map dispatch failures to HTTP status codes
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped, except on 101 Switching Protocols
//! - Backend timeouts result in 504 Gateway Timeout

use std::time::Duration;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use hyper::body::Incoming;

use crate::http::body::IdleTimeout;
use crate::http::request::strip_hop_by_hop;
use crate::net::DialError;

/// Why a request could not be proxied.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request has no Host header")]
    MissingHost,

    #[error("no route for host `{0}`")]
    UnknownHost(String),

    #[error(transparent)]
    BackendDial(#[from] DialError),

    #[error("backend {backend} did not respond within {timeout:?}")]
    BackendTimeout { backend: String, timeout: Duration },

    #[error("backend {backend} failed: {source}")]
    Upstream {
        backend: String,
        #[source]
        source: hyper::Error,
    },

    #[error("backend {backend} sent an unusable response: {reason}")]
    BadResponse { backend: String, reason: &'static str },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::MissingHost | DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::UnknownHost(_) => StatusCode::NOT_FOUND,
            DispatchError::BackendDial(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::BackendDial(_)
            | DispatchError::Upstream { .. }
            | DispatchError::BadResponse { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Body text shown to the client. Backend addresses stay in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            DispatchError::MissingHost => "Missing Host header",
            DispatchError::UnknownHost(_) => "Unknown host",
            DispatchError::InvalidRequest(_) => "Invalid request",
            DispatchError::BackendDial(e) if e.is_timeout() => "Backend timed out",
            DispatchError::BackendTimeout { .. } => "Backend timed out",
            DispatchError::BackendDial(_)
            | DispatchError::Upstream { .. }
            | DispatchError::BadResponse { .. } => "Backend unavailable",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.public_message()).into_response()
    }
}

/// Convert a backend response into the one sent to the client, streaming the body.
///
/// With `idle_timeout` set, a backend that stalls mid-body fails the response.
pub fn prepare_downstream_response(response: Response<Incoming>, idle_timeout: Option<Duration>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    if parts.status != StatusCode::SWITCHING_PROTOCOLS {
        strip_hop_by_hop(&mut parts.headers, false);
    }
    let body = match idle_timeout {
        Some(idle) => Body::new(IdleTimeout::new(body, idle)),
        None => Body::new(body),
    };
    Response::from_parts(parts, body)
}
