//! Request forwarder — buffered upstream calls with a proxy-side deadline
//!
//! The upstream call runs in its own task and races a timer. If the timer
//! wins, the caller gets a fast acknowledgement while the call continues in
//! the background; either way the spawned task releases admission exactly
//! once when it finishes.

use crate::admission::LoadState;
use crate::error::Result;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// Header naming the upstream host; stripped from the outbound request
pub const FORWARD_TO: &str = "Forward-To";

/// Header carrying the anticipated request count for pre-warming
pub const ENSURE_REQUESTS: &str = "Ensure-Requests";

/// Header opting out of upstream certificate verification
pub const INSECURE_SKIP_VERIFY: &str = "Insecure-Skip-Verify";

/// A fully buffered upstream response
#[derive(Debug)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the deadline race produced
#[derive(Debug)]
pub enum ForwardOutcome {
    /// Upstream answered inside the deadline
    Completed(UpstreamReply),
    /// Upstream failed inside the deadline
    Failed(String),
    /// Deadline elapsed; the upstream call continues unobserved
    InProgress,
}

/// Forwards requests to caller-designated upstreams
pub struct Forwarder {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let insecure_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            insecure_client,
        })
    }

    /// Send the captured request upstream, racing `timeout`.
    ///
    /// The caller has already admitted the request; the task spawned here
    /// owns the release. The timer branch is polled first so a zero
    /// timeout always reports `InProgress`.
    pub async fn forward(
        &self,
        load: Arc<LoadState>,
        method: Method,
        url: String,
        headers: HeaderMap,
        body: Bytes,
        insecure: bool,
        timeout: Duration,
    ) -> ForwardOutcome {
        let client = if insecure {
            self.insecure_client.clone()
        } else {
            self.client.clone()
        };

        let upstream = tokio::spawn(async move {
            let result = send_upstream(client, method, &url, headers, body).await;
            if let Err(e) = &result {
                tracing::debug!(url, error = %e, "Upstream request failed");
            }
            load.release();
            result
        });

        tokio::select! {
            biased;
            _ = tokio::time::sleep(timeout) => ForwardOutcome::InProgress,
            joined = upstream => match joined {
                Ok(Ok(reply)) => ForwardOutcome::Completed(reply),
                Ok(Err(e)) => ForwardOutcome::Failed(e.to_string()),
                Err(e) => ForwardOutcome::Failed(format!("upstream task failed: {}", e)),
            },
        }
    }
}

async fn send_upstream(
    client: reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<UpstreamReply> {
    let response = client
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    // Fully buffer before write-back; a partial body is discarded with the error
    let body = response.bytes().await?;

    Ok(UpstreamReply {
        status,
        headers,
        body,
    })
}

/// Headers for the outbound request: a verbatim copy of the inbound
/// headers minus the forwarding directive itself.
pub fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if name.as_str().eq_ignore_ascii_case(FORWARD_TO) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Whether the caller asked to skip upstream certificate verification
pub fn wants_insecure(headers: &HeaderMap) -> bool {
    headers
        .get(INSECURE_SKIP_VERIFY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
