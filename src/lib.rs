//! # flock-proxy
//!
//! A self-scaling HTTP forwarding proxy that runs as one replica of an
//! ordered, replicated group (a Kubernetes StatefulSet). Each replica
//! forwards client requests to caller-designated upstream hosts while the
//! group cooperatively resizes itself under load and sheds idle replicas.
//!
//! ## Architecture
//!
//! ```text
//! Client → HTTP surface → Admission → Forwarder → Upstream
//!                ↑                        │
//!          Group view ← Watcher      deadline race (202 past timeout)
//!                ↑
//!          Orchestrator ← Scaler (tail replica only)
//! ```
//!
//! ## Core behaviors
//!
//! - **Bounded admission**: a hard per-replica cap answered with 429, and a
//!   soft target that triggers proactive scale-up.
//! - **Tail authority**: only the highest-ordinal replica resizes the
//!   group, double-checked under the count mutex — no leader election.
//! - **Deadline race**: slow upstreams get a fast 202 while the call
//!   finishes in the background; fast ones are relayed synchronously.
//! - **Idle retirement**: an above-minimum tail replica scales the group
//!   down and exits 0 after sustained inactivity.
//! - **Metric side-channel**: every response carries the group membership,
//!   so clients can pick replicas themselves.

pub mod admission;
pub mod config;
pub mod context;
pub mod error;
pub mod forwarder;
pub mod identity;
pub mod idle;
pub mod scaling;
pub mod server;
pub mod stats;
pub mod view;
pub mod watcher;

// Re-export main types
pub use context::ProxyContext;
pub use error::{ProxyError, Result};
pub use identity::ReplicaIdentity;
