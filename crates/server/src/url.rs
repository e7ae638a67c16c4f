//! Absolute upload URL composition.

use axum::http::HeaderMap;
use freight_core::config::ServerConfig;
use freight_core::headers::parse_forwarded;

/// Build the absolute URL for an upload ID.
///
/// If the configured base path is itself absolute, the ID is appended
/// directly. Otherwise the scheme and host come from the request, with
/// `X-Forwarded-Host`, `X-Forwarded-Proto`, and `Forwarded` honored only
/// when the deployment trusts its proxies.
pub fn abs_file_url(config: &ServerConfig, headers: &HeaderMap, id: &str) -> String {
    if config.base_path_is_absolute() {
        return format!("{}{}", config.base_path, id);
    }

    let (host, proto) = host_and_protocol(config, headers);
    format!("{proto}://{host}{}{id}", config.base_path)
}

fn host_and_protocol(config: &ServerConfig, headers: &HeaderMap) -> (String, String) {
    // The server itself only listens on plain HTTP; TLS terminates upstream
    // and announces itself via the forwarded headers below.
    let mut proto = "http".to_string();
    let mut host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();

    if !config.respect_forwarded_headers {
        return (host, proto);
    }

    if let Some(value) = headers.get("X-Forwarded-Host").and_then(|v| v.to_str().ok())
        && !value.is_empty()
    {
        host = value.to_string();
    }

    if let Some(value) = headers.get("X-Forwarded-Proto").and_then(|v| v.to_str().ok())
        && (value == "http" || value == "https")
    {
        proto = value.to_string();
    }

    if let Some(value) = headers.get(axum::http::header::FORWARDED).and_then(|v| v.to_str().ok()) {
        let fwd = parse_forwarded(value);
        if let Some(h) = fwd.host {
            host = h;
        }
        if let Some(p) = fwd.proto {
            proto = p;
        }
    }

    (host, proto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_relative_base_uses_request_host() {
        let config = ServerConfig::default();
        let url = abs_file_url(&config, &headers(&[("host", "upload.example.com")]), "abc");
        assert_eq!(url, "http://upload.example.com/files/abc");
    }

    #[test]
    fn test_absolute_base_ignores_request() {
        let config = ServerConfig {
            base_path: "https://cdn.example.com/files/".to_string(),
            ..Default::default()
        };
        let url = abs_file_url(&config, &headers(&[("host", "ignored")]), "abc");
        assert_eq!(url, "https://cdn.example.com/files/abc");
    }

    #[test]
    fn test_forwarded_headers_ignored_by_default() {
        let config = ServerConfig::default();
        let url = abs_file_url(
            &config,
            &headers(&[
                ("host", "internal"),
                ("x-forwarded-host", "public.example.com"),
                ("x-forwarded-proto", "https"),
            ]),
            "abc",
        );
        assert_eq!(url, "http://internal/files/abc");
    }

    #[test]
    fn test_forwarded_header_wins_when_trusted() {
        let config = ServerConfig {
            respect_forwarded_headers: true,
            ..Default::default()
        };
        let url = abs_file_url(
            &config,
            &headers(&[
                ("host", "internal"),
                ("x-forwarded-host", "second.example.com"),
                ("forwarded", "proto=https;host=first.example.com"),
            ]),
            "abc",
        );
        assert_eq!(url, "https://first.example.com/files/abc");
    }
}
