//! Centralized error types for flock-proxy

use thiserror::Error;

/// Proxy error types
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Replica identity could not be established from the environment
    #[error("Identity error: {0}")]
    Identity(String),

    /// Annotation parsing or constraint validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Orchestrator API call failed
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// No usable HTTP-GET readiness probe in the pod spec
    #[error("Probe error: {0}")]
    Probe(String),

    /// Scale update retries exhausted
    #[error("Scale update failed after {attempts} attempts: {last_error}")]
    ScaleExhausted { attempts: u32, last_error: String },

    /// Upstream request error
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ProxyError>;
