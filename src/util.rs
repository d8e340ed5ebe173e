//! Shared helpers for the shophooks pipeline.

use std::net::IpAddr;

use axum::http::HeaderMap;

/// Extract the client IP address from request headers.
///
/// Tries `x-forwarded-for` first (taking the first hop, which is the
/// original client when the proxy is trusted), then `x-real-ip`. Webhook
/// traffic always arrives through the edge proxy, so a missing header means
/// the source cannot be attributed.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    let raw = forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    })?;

    raw.parse().ok()
}

/// Current Unix timestamp in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), Some("198.51.100.2".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_missing() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_client_ip_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers), None);
    }
}
