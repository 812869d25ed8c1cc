//! HTTP surface — one listener, one dispatching handler
//!
//! Every proxy-layer response carries the six metric headers, set after any
//! upstream headers are copied so they stay authoritative. Dispatch order:
//! ensure-hint, metrics-only, forward.

use crate::context::ProxyContext;
use crate::error::{ProxyError, Result};
use crate::forwarder::{
    outbound_headers, wants_insecure, ForwardOutcome, ENSURE_REQUESTS, FORWARD_TO,
};
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Bind the listener and serve until it fails. A listener failure is fatal
/// to the process; per-connection errors are logged and absorbed.
pub async fn run(ctx: Arc<ProxyContext>) -> Result<()> {
    let http = ctx.config().http;
    let addr = SocketAddr::from(([0, 0, 0, 0], http.port));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ProxyError::Http(format!("failed to bind {}: {}", addr, e)))?;

    tracing::info!(port = http.port, path = http.path, "HTTP surface listening");

    loop {
        let (stream, _remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let served = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |req| handle_request(req, ctx.clone())),
                )
                .await;
            if let Err(e) = served {
                // Client write failures are swallowed; counters already reconciled
                tracing::debug!(error = %e, "Connection ended with error");
            }
        });
    }
}

/// Single dispatching handler bound at the latched path
pub async fn handle_request(
    req: Request<Incoming>,
    ctx: Arc<ProxyContext>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let serve_path = ctx.config().http.path;
    if !path_matches(&serve_path, req.uri().path()) {
        return Ok(empty_status(StatusCode::NOT_FOUND));
    }

    // Ensure-hint short-circuits forwarding
    if let Some(raw) = trimmed_header(req.headers(), ENSURE_REQUESTS) {
        return Ok(handle_ensure(&ctx, &raw).await);
    }

    let forward_to = trimmed_header(req.headers(), FORWARD_TO);
    match forward_to {
        None => Ok(plain_response(&ctx, StatusCode::OK, StatusCode::OK, Bytes::new())),
        Some(url) => Ok(handle_forward(req, &ctx, url).await),
    }
}

/// Scale-hint flow: translate the anticipated request count into a replica
/// count and grow the group if it is short.
async fn handle_ensure(ctx: &Arc<ProxyContext>, raw: &str) -> Response<Full<Bytes>> {
    let expected: u64 = match raw.parse() {
        Ok(n) => n,
        Err(_) => {
            return plain_response(
                ctx,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::new(),
            )
        }
    };

    let config = ctx.config();
    match crate::scaling::desired_for_hint(&config, expected) {
        Some(desired) => {
            if let Err(e) = ctx.scaler.ensure_replicas(desired).await {
                tracing::error!(error = %e, "Ensure-hint scale update failed");
                std::process::exit(1);
            }
        }
        None => {
            tracing::warn!(
                expected,
                max_requests = config.max_requests,
                "Ensure hint ignored: per-replica budget rounds to zero"
            );
        }
    }

    plain_response(ctx, StatusCode::OK, StatusCode::OK, Bytes::new())
}

/// Forward flow: admit, capture the body, race the upstream call against
/// the proxy deadline.
async fn handle_forward(
    req: Request<Incoming>,
    ctx: &Arc<ProxyContext>,
    url: String,
) -> Response<Full<Bytes>> {
    let config = ctx.config();

    if !ctx.load.try_admit(config.max_requests) {
        return plain_response(
            ctx,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
            Bytes::new(),
        );
    }

    // Past the soft target: ask for one more replica while this one works
    if ctx.load.free_slots(config.soft_target()) <= 0 {
        let scaler = ctx.scaler.clone();
        tokio::spawn(async move {
            match scaler.scale_up_if_tail().await {
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Scale-up failed");
                    std::process::exit(1);
                }
            }
        });
    }

    let (parts, body) = req.into_parts();

    // The client connection must be free to close while the upstream call
    // proceeds, so the body is captured before spawning it
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            ctx.load.release();
            return plain_response(
                ctx,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::new(),
            );
        }
    };

    let outcome = ctx
        .forwarder
        .forward(
            ctx.load.clone(),
            parts.method,
            url,
            outbound_headers(&parts.headers),
            body_bytes,
            wants_insecure(&parts.headers),
            Duration::from_millis(config.proxy_timeout_ms),
        )
        .await;

    match outcome {
        ForwardOutcome::InProgress => {
            plain_response(ctx, StatusCode::ACCEPTED, StatusCode::ACCEPTED, Bytes::new())
        }
        ForwardOutcome::Failed(message) => plain_response(
            ctx,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from(message),
        ),
        ForwardOutcome::Completed(reply) => {
            let mut response = Response::new(Full::new(reply.body));
            *response.status_mut() = reply.status;

            let headers = response.headers_mut();
            for (name, value) in reply.headers.iter() {
                headers.append(name.clone(), value.clone());
            }
            // Metric headers go in last so they win over upstream values
            set_metric_headers(ctx, headers, StatusCode::OK);

            response
        }
    }
}

/// A proxy-layer response: `status` on the wire, `proxy_status` in the
/// metric headers (they differ only for upstream-completed forwards).
fn plain_response(
    ctx: &ProxyContext,
    status: StatusCode,
    proxy_status: StatusCode,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    set_metric_headers(ctx, response.headers_mut(), proxy_status);
    response
}

/// Set the six metric headers, replacing any copied upstream values
fn set_metric_headers(ctx: &ProxyContext, headers: &mut HeaderMap, proxy_status: StatusCode) {
    if proxy_status == StatusCode::TOO_MANY_REQUESTS {
        ctx.load.record_denial();
    }

    let config = ctx.config();
    let counter = ctx.load.next_request_number();
    let free = ctx.load.free_slots(config.soft_target());
    let snapshot = ctx.view.snapshot();

    insert(headers, "proxy-counter", &counter.to_string());
    insert(headers, "proxy-free", &free.to_string());
    insert(headers, "proxy-ordinal", &ctx.identity.ordinal.to_string());
    insert(headers, "proxy-status", &proxy_status.as_u16().to_string());
    insert(headers, "proxy-version", &snapshot.version);
    insert(headers, "proxy-list", &snapshot.peers_json);
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = http::HeaderValue::from_str(value) {
        headers.insert(http::HeaderName::from_static(name), value);
    }
}

fn empty_status(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn trimmed_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// ServeMux-style matching: a pattern ending in `/` matches the subtree,
/// anything else matches exactly.
fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ReplicaIdentity;
    use crate::scaling::MockScaleApi;

    fn make_ctx(ordinal: i64) -> Arc<ProxyContext> {
        ProxyContext::new(
            ReplicaIdentity::new("proxy", "default", ordinal),
            Arc::new(MockScaleApi::new()),
        )
        .unwrap()
    }

    // --- path matching ---

    #[test]
    fn test_root_matches_everything() {
        assert!(path_matches("/", "/"));
        assert!(path_matches("/", "/anything"));
        assert!(path_matches("/", "/a/b/c"));
    }

    #[test]
    fn test_exact_pattern() {
        assert!(path_matches("/healthz", "/healthz"));
        assert!(!path_matches("/healthz", "/healthz/x"));
        assert!(!path_matches("/healthz", "/other"));
    }

    #[test]
    fn test_subtree_pattern() {
        assert!(path_matches("/api/", "/api/"));
        assert!(path_matches("/api/", "/api/v1"));
        assert!(!path_matches("/api/", "/api"));
    }

    // --- header helpers ---

    #[test]
    fn test_trimmed_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Forward-To", " http://u/ ".parse().unwrap());
        assert_eq!(
            trimmed_header(&headers, "Forward-To").as_deref(),
            Some("http://u/")
        );

        headers.insert("Empty", "   ".parse().unwrap());
        assert_eq!(trimmed_header(&headers, "Empty"), None);
        assert_eq!(trimmed_header(&headers, "Missing"), None);
    }

    // --- metric headers ---

    #[test]
    fn test_metric_headers_complete() {
        let ctx = make_ctx(2);
        ctx.view.swap_count(3);
        ctx.view
            .set_membership(r#"{"0":"10.0.0.1"}"#.to_string(), "v9".to_string());

        let response = plain_response(&ctx, StatusCode::OK, StatusCode::OK, Bytes::new());
        let headers = response.headers();

        assert_eq!(headers.get("Proxy-Counter").unwrap(), "1");
        assert_eq!(headers.get("Proxy-Ordinal").unwrap(), "2");
        assert_eq!(headers.get("Proxy-Status").unwrap(), "200");
        assert_eq!(headers.get("Proxy-Version").unwrap(), "v9");
        assert_eq!(headers.get("Proxy-List").unwrap(), r#"{"0":"10.0.0.1"}"#);
        assert!(headers.get("Proxy-Free").is_some());
    }

    #[test]
    fn test_counter_increments_per_response() {
        let ctx = make_ctx(0);
        let first = plain_response(&ctx, StatusCode::OK, StatusCode::OK, Bytes::new());
        let second = plain_response(&ctx, StatusCode::OK, StatusCode::OK, Bytes::new());
        assert_eq!(first.headers().get("Proxy-Counter").unwrap(), "1");
        assert_eq!(second.headers().get("Proxy-Counter").unwrap(), "2");
    }

    #[test]
    fn test_denial_counted_on_429() {
        let ctx = make_ctx(0);
        let _ = plain_response(
            &ctx,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
            Bytes::new(),
        );
        assert_eq!(ctx.load.deny_count(), 1);
        let _ = plain_response(&ctx, StatusCode::OK, StatusCode::OK, Bytes::new());
        assert_eq!(ctx.load.deny_count(), 1);
    }

    #[test]
    fn test_free_header_reflects_load() {
        let ctx = make_ctx(0);
        // maxRequests=10, loadFactor=0.5 → soft target 5; 4 in flight → free 1
        for _ in 0..4 {
            assert!(ctx.load.try_admit(10));
        }
        let response = plain_response(&ctx, StatusCode::OK, StatusCode::OK, Bytes::new());
        assert_eq!(response.headers().get("Proxy-Free").unwrap(), "1");
    }

    #[test]
    fn test_metric_headers_override_upstream() {
        let ctx = make_ctx(1);
        let mut headers = HeaderMap::new();
        headers.insert("Proxy-Status", "999".parse().unwrap());
        headers.insert("X-Upstream", "kept".parse().unwrap());

        set_metric_headers(&ctx, &mut headers, StatusCode::OK);

        assert_eq!(headers.get("Proxy-Status").unwrap(), "200");
        assert_eq!(headers.get("X-Upstream").unwrap(), "kept");
    }
}
