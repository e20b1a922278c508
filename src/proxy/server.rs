//! HTTP Servers
//!
//! Accept loops for the proxy listener and the admin endpoints. Each
//! accepted connection is served on its own task.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::origin::OriginRequest;
use crate::cache::{CacheKey, TierController};
use crate::error::{Error, Result};
use crate::monitoring::{render_prometheus, HealthReport};

static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Reverse proxy listener
pub struct ProxyServer {
    controller: Arc<TierController>,
}

impl ProxyServer {
    /// Create a server answering through `controller`
    pub fn new(controller: Arc<TierController>) -> Self {
        Self { controller }
    }

    /// Bind `addr` and serve until the task is dropped
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Proxy listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Proxy accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let controller = self.controller.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| proxy_handler(controller.clone(), req, peer));
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Proxy connection error from {}: {}", peer, e);
                }
            });
        }
    }
}

async fn proxy_handler(
    controller: Arc<TierController>,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body from {}: {}", peer, e);
            return Ok(plain(StatusCode::BAD_REQUEST, "bad request"));
        }
    };

    let request = OriginRequest {
        method: parts.method,
        path_and_query: CacheKey::from_uri(&parts.uri).into_string(),
        headers: parts.headers,
        body,
        client_ip: Some(peer.ip()),
    };

    match controller.lookup(request).await {
        Ok(served) => {
            let mut response = Response::new(Full::new(served.response.body));
            *response.status_mut() = served.response.status;
            *response.headers_mut() = served.response.headers;
            response.headers_mut().insert(
                X_CACHE.clone(),
                HeaderValue::from_static(served.cache.as_header_value()),
            );
            Ok(response)
        }
        Err(Error::OriginUnavailable { origin, reason }) => {
            warn!("Origin {} unavailable: {}", origin, reason);
            Ok(plain(StatusCode::BAD_GATEWAY, "bad gateway"))
        }
        Err(e) => {
            error!("Request failed: {}", e);
            Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

// =============================================================================
// Admin Server
// =============================================================================

/// Metrics, health and stats endpoints
pub struct AdminServer {
    controller: Arc<TierController>,
}

impl AdminServer {
    /// Create an admin server reporting on `controller`
    pub fn new(controller: Arc<TierController>) -> Self {
        Self { controller }
    }

    /// Bind `addr` and serve until the task is dropped
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Admin server listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Admin accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let controller = self.controller.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| admin_handler(controller.clone(), req));
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Admin connection error: {}", e);
                }
            });
        }
    }
}

async fn admin_handler(
    controller: Arc<TierController>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => match render_prometheus(&controller.metrics()) {
            Ok(text) => {
                let mut response = plain(StatusCode::OK, text);
                if let Ok(value) = HeaderValue::from_str(TextEncoder::new().format_type()) {
                    response.headers_mut().insert(header::CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        },
        "/livez" => plain(StatusCode::OK, "ok"),
        // Degraded still serves traffic, so readiness only fails on a hard error.
        "/readyz" => plain(StatusCode::OK, "ok"),
        "/healthz" => json(&HealthReport::from_snapshot(&controller.metrics())),
        "/stats" => json(&controller.metrics()),
        _ => plain(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn json<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = plain(StatusCode::OK, body);
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
