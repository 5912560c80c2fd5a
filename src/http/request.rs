//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract the routing key (Host header, or URI authority for HTTP/2)
//! - Detect protocol upgrade requests
//! - Prepare request for forwarding to backend
//!
//! # Design Decisions
//! - Upstream requests are always HTTP/1.1 in origin form
//! - The client's Host is passed through unchanged
//! - Hop-by-hop headers are stripped, except the upgrade handshake itself

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Uri, Version};

use crate::http::response::DispatchError;
use crate::net::ConnectionContext;
use crate::routing::normalize_host;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Raw Host of a request: the `Host` header, else the URI authority.
pub fn raw_host<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .or_else(|| req.uri().authority().map(|authority| authority.as_str()))
}

/// Normalized routing key for a request.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    raw_host(req).and_then(normalize_host)
}

/// Whether this is an HTTP/1.1 `Connection: upgrade` request.
pub fn is_upgrade_request(version: Version, headers: &HeaderMap) -> bool {
    version == Version::HTTP_11 && headers.contains_key(header::UPGRADE) && connection_has_token(headers, "upgrade")
}

fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Remove hop-by-hop headers, including any named by `Connection`.
///
/// With `keep_upgrade`, `Connection` and `Upgrade` survive so the handshake can reach the backend.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|item| HeaderName::from_bytes(item.trim().as_bytes()).ok())
        .filter(|name| !(keep_upgrade && name == header::UPGRADE))
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP.iter() {
        if keep_upgrade && name == header::CONNECTION {
            continue;
        }
        headers.remove(name);
    }

    if keep_upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    } else {
        headers.remove(header::UPGRADE);
    }
}

/// Rewrite a client request for the backend.
pub fn prepare_upstream_request(
    req: Request<Body>,
    ctx: &ConnectionContext,
    upgrade: bool,
) -> Result<Request<Body>, DispatchError> {
    let original_host = raw_host(&req)
        .map(str::to_string)
        .ok_or(DispatchError::MissingHost)?;
    let (mut parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.uri = path
        .parse::<Uri>()
        .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers, upgrade);

    let host_value =
        HeaderValue::from_str(&original_host).map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
    parts.headers.insert(header::HOST, host_value.clone());
    parts.headers.insert(X_FORWARDED_HOST, host_value);
    parts
        .headers
        .insert(X_FORWARDED_PROTO, HeaderValue::from_static(ctx.listener.scheme()));

    let peer_ip = ctx.peer.ip().to_string();
    let forwarded_for = match parts.headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {peer_ip}"),
        None => peer_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        parts.headers.insert(X_FORWARDED_FOR, value);
    }

    Ok(Request::from_parts(parts, body))
}
