//! Origin Forwarder
//!
//! Round-trips a request to the configured origin with the usual reverse
//! proxy header adjustments. The cache only calls this on a miss (or for
//! requests it does not cache at all).

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, StatusCode};
use reqwest::Url;
use tracing::debug;

use crate::error::{Error, Result};

/// Default origin round-trip timeout
pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(30);

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Request as handed to the origin
#[derive(Debug, Clone)]
pub struct OriginRequest {
    /// HTTP method
    pub method: Method,
    /// Path and query, verbatim from the inbound request line
    pub path_and_query: String,
    /// Inbound headers
    pub headers: HeaderMap,
    /// Inbound body
    pub body: Bytes,
    /// Address of the downstream client, if known
    pub client_ip: Option<IpAddr>,
}

impl OriginRequest {
    /// Bodyless GET, mostly useful in tests and probes
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_ip: None,
        }
    }
}

/// Response returned by the origin
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// Status code
    pub status: StatusCode,
    /// End-to-end response headers
    pub headers: HeaderMap,
    /// Full response body
    pub body: Bytes,
}

impl OriginResponse {
    /// 200 response with no headers
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Upstream round trip performed on a cache miss
#[async_trait]
pub trait OriginForwarder: Send + Sync {
    /// Forward `request` and return the origin's full response
    async fn forward(&self, request: OriginRequest) -> Result<OriginResponse>;
}

/// HTTP forwarder to a single origin
#[derive(Debug)]
pub struct HttpOriginForwarder {
    origin: Url,
    client: reqwest::Client,
}

impl HttpOriginForwarder {
    /// Create a forwarder for `origin` (an absolute http or https URL)
    pub fn new(origin: &str, timeout: Duration) -> Result<Self> {
        let origin = Url::parse(origin)
            .map_err(|e| Error::Config(format!("Invalid origin URL '{}': {}", origin, e)))?;
        if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
            return Err(Error::Config(format!(
                "Origin must be an http(s) URL with a host, got '{}'",
                origin
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client creation failed: {}", e)))?;

        Ok(Self { origin, client })
    }

    /// Origin base URL
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Upstream URL for an inbound path and query
    pub fn target_url(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.origin.clone();
        url.set_path(&join_paths(self.origin.path(), path));

        let base_query = self.origin.query().filter(|q| !q.is_empty());
        let query = query.filter(|q| !q.is_empty());
        let merged = match (base_query, query) {
            (Some(a), Some(b)) => Some(format!("{}&{}", a, b)),
            (Some(a), None) => Some(a.to_string()),
            (None, Some(b)) => Some(b.to_string()),
            (None, None) => None,
        };
        url.set_query(merged.as_deref());
        url
    }

    fn unavailable(&self, err: reqwest::Error) -> Error {
        let reason = if err.is_timeout() {
            format!("timed out: {}", err)
        } else {
            err.to_string()
        };
        Error::OriginUnavailable {
            origin: self.origin.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl OriginForwarder for HttpOriginForwarder {
    async fn forward(&self, request: OriginRequest) -> Result<OriginResponse> {
        let url = self.target_url(&request.path_and_query);
        let headers = outbound_headers(request.headers, request.client_ip);

        debug!("Forwarding {} {}", request.method, url);

        let response = self
            .client
            .request(request.method, url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await.map_err(|e| self.unavailable(e))?;

        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }
}

/// Join two URL paths with exactly one slash between them
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Inbound headers adjusted for the origin hop
fn outbound_headers(mut headers: HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    strip_hop_by_hop(&mut headers);

    // The client derives Host from the target URL.
    if let Some(host) = headers.remove(header::HOST) {
        headers.insert(X_FORWARDED_HOST.clone(), host);
    }

    if let Some(ip) = client_ip {
        let prior: Vec<&str> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {}", prior.join(", "), ip)
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }

    headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));
    headers
}

/// Remove headers that only apply to a single connection
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        HeaderName::from_static("proxy-connection"),
        HeaderName::from_static("keep-alive"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn forwarder(origin: &str) -> HttpOriginForwarder {
        HttpOriginForwarder::new(origin, DEFAULT_ORIGIN_TIMEOUT).unwrap()
    }

    #[test]
    fn test_rejects_invalid_origins() {
        assert_matches!(
            HttpOriginForwarder::new("example.com", DEFAULT_ORIGIN_TIMEOUT),
            Err(Error::Config(_))
        );
        assert_matches!(
            HttpOriginForwarder::new("ftp://example.com", DEFAULT_ORIGIN_TIMEOUT),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_target_url_joins_paths() {
        let f = forwarder("http://origin.local");
        assert_eq!(f.target_url("/a/b?x=1").as_str(), "http://origin.local/a/b?x=1");

        let f = forwarder("http://origin.local/base/");
        assert_eq!(f.target_url("/a").as_str(), "http://origin.local/base/a");

        let f = forwarder("http://origin.local/base");
        assert_eq!(f.target_url("/a").as_str(), "http://origin.local/base/a");
    }

    #[test]
    fn test_target_url_merges_queries() {
        let f = forwarder("http://origin.local/?token=abc");
        assert_eq!(
            f.target_url("/a?x=1").as_str(),
            "http://origin.local/a?token=abc&x=1"
        );
        assert_eq!(f.target_url("/a").as_str(), "http://origin.local/a?token=abc");

        let f = forwarder("http://origin.local");
        assert_eq!(f.target_url("/a?").as_str(), "http://origin.local/a");
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/", "/x"), "/x");
        assert_eq!(join_paths("/base", "x"), "/base/x");
        assert_eq!(join_paths("/base/", "x"), "/base/x");
        assert_eq!(join_paths("/base", "/x"), "/base/x");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_outbound_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let ip: IpAddr = "192.168.1.9".parse().unwrap();
        let out = outbound_headers(headers, Some(ip));

        assert!(!out.contains_key(header::HOST));
        assert_eq!(out["x-forwarded-host"], "proxy.local");
        assert_eq!(out["x-forwarded-for"], "10.0.0.1, 192.168.1.9");
        assert_eq!(out["x-forwarded-proto"], "http");
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_unavailable() {
        // Port 9 (discard) on loopback is closed in test environments.
        let f = HttpOriginForwarder::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = f.forward(OriginRequest::get("/")).await;
        assert_matches!(result, Err(Error::OriginUnavailable { .. }));
    }
}
