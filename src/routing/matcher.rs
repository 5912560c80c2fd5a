//! Host header normalization.
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - A trailing `:port` is ignored, so `example.com:8080` routes like `example.com`
//! - A trailing dot is ignored (`example.com.` is the same name)
//! - Bracketed IPv6 literals keep their brackets and lose their port

/// Reduce a `Host` header value (or URI authority) to its routing key.
///
/// Returns `None` when nothing routable is left.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let host = if raw.starts_with('[') {
        // "[::1]:8080" -> "[::1]"
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => return None,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((name, port))
                if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
            {
                name
            }
            _ => raw,
        }
    };

    let host = host.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}
