//! Configuration for flock-proxy
//!
//! Runtime configuration arrives as annotations on the replica group's
//! StatefulSet and is re-applied on every watch event. The HTTP listener
//! port and path are derived once from the group's readiness probe and
//! latched for the process lifetime.

use crate::error::{ProxyError, Result};
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Process-wide config handle: whole-struct replacement, short reads
pub type SharedConfig = Arc<RwLock<ProxyConfig>>;

/// Annotation: minimum number of proxy replicas (> 0)
const ANN_MIN_PROXIES: &str = "minProxies";

/// Annotation: maximum number of proxy replicas (>= minProxies)
const ANN_MAX_PROXIES: &str = "maxProxies";

/// Annotation: hard cap of concurrent requests per replica
const ANN_MAX_REQUESTS: &str = "maxRequests";

/// Annotation: target utilization fraction of maxRequests (0, 1]
const ANN_MAX_LOAD_FACTOR: &str = "maxLoadFactor";

/// Annotation: proxy-side forwarding deadline in milliseconds
const ANN_PROXY_TIMEOUT: &str = "proxyTimeout";

/// Annotation: seconds of inactivity before voluntary retirement
const ANN_IDLE_TIMEOUT: &str = "idleTimeout";

/// Annotation: verbosity of the periodic stats summary
const ANN_DEBUG_LEVEL: &str = "debugLevel";

/// HTTP listener settings, latched at startup from the readiness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serving path (the readiness probe's path, or "/")
    pub path: String,
    /// Listener port (0 until latched)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            port: 0,
        }
    }
}

impl HttpConfig {
    /// Whether the port/path have been derived yet
    pub fn is_latched(&self) -> bool {
        self.port != 0
    }
}

/// Proxy configuration, replaced atomically on every annotation reload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Minimum replica count the group may shrink to
    pub min_proxies: i64,
    /// Maximum replica count the group may grow to
    pub max_proxies: i64,
    /// Hard cap of concurrent requests admitted per replica
    pub max_requests: i64,
    /// Fraction of `max_requests` at which proactive scale-up begins
    pub max_load_factor: f64,
    /// Milliseconds to wait for upstream before answering 202
    pub proxy_timeout_ms: u64,
    /// Seconds of inactivity before an above-minimum tail replica retires
    pub idle_timeout_secs: u64,
    /// Gates the periodic stats summary (>= 1 enables it)
    pub debug_level: i64,
    /// Latched HTTP listener settings
    pub http: HttpConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            min_proxies: 1,
            max_proxies: i64::MAX,
            max_requests: 100,
            max_load_factor: 0.5,
            proxy_timeout_ms: 100,
            idle_timeout_secs: 10,
            debug_level: 0,
            http: HttpConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Parse a configuration from StatefulSet annotations.
    ///
    /// Missing or blank values fall back to defaults; unparseable or
    /// out-of-range values are an error. The returned config carries a
    /// default (unlatched) `http` section; the caller preserves the latch.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self> {
        let min_proxies = parse_int(annotations, ANN_MIN_PROXIES, 1)?;
        if min_proxies <= 0 {
            return Err(ProxyError::Config(format!(
                "{} must be > 0, got {}",
                ANN_MIN_PROXIES, min_proxies
            )));
        }

        let max_proxies = parse_int(annotations, ANN_MAX_PROXIES, i64::MAX)?;
        if max_proxies < min_proxies {
            return Err(ProxyError::Config(format!(
                "{} must be >= {}: {} was not >= {}",
                ANN_MAX_PROXIES, ANN_MIN_PROXIES, max_proxies, min_proxies
            )));
        }

        let max_requests = parse_int(annotations, ANN_MAX_REQUESTS, 100)?;
        if max_requests <= 0 {
            return Err(ProxyError::Config(format!(
                "{} must be > 0, got {}",
                ANN_MAX_REQUESTS, max_requests
            )));
        }

        let max_load_factor = parse_float(annotations, ANN_MAX_LOAD_FACTOR, 0.5)?;
        if !(max_load_factor > 0.0 && max_load_factor <= 1.0) {
            return Err(ProxyError::Config(format!(
                "{} must be in (0, 1], got {}",
                ANN_MAX_LOAD_FACTOR, max_load_factor
            )));
        }

        let proxy_timeout_ms = parse_non_negative(annotations, ANN_PROXY_TIMEOUT, 100)?;
        let idle_timeout_secs = parse_non_negative(annotations, ANN_IDLE_TIMEOUT, 10)?;
        let debug_level = parse_non_negative(annotations, ANN_DEBUG_LEVEL, 0)? as i64;

        Ok(Self {
            min_proxies,
            max_proxies,
            max_requests,
            max_load_factor,
            proxy_timeout_ms,
            idle_timeout_secs,
            debug_level,
            http: HttpConfig::default(),
        })
    }

    /// The load at which proactive scale-up begins:
    /// `floor(max_requests * max_load_factor)`
    pub fn soft_target(&self) -> i64 {
        (self.max_requests as f64 * self.max_load_factor) as i64
    }
}

/// Should applying `new` over `old` reset the idle timer?
///
/// True when the idle timeout itself changed, or when a `minProxies`
/// reduction just moved this replica into the retirement-eligible range.
/// A `minProxies` raise deliberately does not reset.
pub fn resets_idle_timer(old: &ProxyConfig, new: &ProxyConfig, ordinal: i64) -> bool {
    new.idle_timeout_secs != old.idle_timeout_secs
        || (ordinal > new.min_proxies && ordinal <= old.min_proxies)
}

fn parse_int(annotations: &BTreeMap<String, String>, key: &str, default: i64) -> Result<i64> {
    match annotations.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse::<i64>().map_err(|e| {
            ProxyError::Config(format!("annotation {} = '{}' is not an integer: {}", key, raw, e))
        }),
    }
}

fn parse_non_negative(
    annotations: &BTreeMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64> {
    let value = parse_int(annotations, key, default as i64)?;
    u64::try_from(value)
        .map_err(|_| ProxyError::Config(format!("annotation {} must be >= 0, got {}", key, value)))
}

fn parse_float(annotations: &BTreeMap<String, String>, key: &str, default: f64) -> Result<f64> {
    match annotations.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse::<f64>().map_err(|e| {
            ProxyError::Config(format!("annotation {} = '{}' is not a number: {}", key, raw, e))
        }),
    }
}

/// Derive the HTTP listener settings from the first HTTP-GET readiness
/// probe among `containers` (the first pod of the group).
pub fn http_config_from_probe(containers: &[Container]) -> Result<HttpConfig> {
    for container in containers {
        let http_get = match container.readiness_probe.as_ref().and_then(|p| p.http_get.as_ref()) {
            Some(h) => h,
            None => continue,
        };

        let port = match &http_get.port {
            IntOrString::Int(p) if *p > 0 => *p as u16,
            // Named and non-positive ports cannot back a listener
            _ => {
                return Err(ProxyError::Probe(format!(
                    "readiness probe in container '{}' has no numeric port",
                    container.name
                )))
            }
        };

        let path = match http_get.path.as_deref() {
            Some("") | None => "/".to_string(),
            Some(p) => p.to_string(),
        };

        return Ok(HttpConfig { path, port });
    }

    Err(ProxyError::Probe(
        "found no HTTP-GET readiness probe in container spec".into(),
    ))
}
