//! Replica identity — who this process is within its ordered group
//!
//! Identity is read once from the environment at startup and never changes.
//! The ordinal is the trailing integer of the pod name after the
//! `<group>-` prefix, matching StatefulSet pod naming.

use crate::error::{ProxyError, Result};

/// Immutable identity of this replica
#[derive(Debug, Clone)]
pub struct ReplicaIdentity {
    /// Pod name (e.g., "proxy-2")
    pub name: String,
    /// StatefulSet name (e.g., "proxy")
    pub group: String,
    /// Namespace the pod runs in
    pub namespace: String,
    /// 0-based index of this replica within the group
    pub ordinal: i64,
}

impl ReplicaIdentity {
    /// Build identity from `POD_NAME`, `POD_NAMESPACE`, `POD_STATEFULSET`.
    /// All three are required; a malformed pod name is fatal.
    pub fn from_env() -> Result<Self> {
        let name = require_env("POD_NAME")?;
        let namespace = require_env("POD_NAMESPACE")?;
        let group = require_env("POD_STATEFULSET")?;
        let ordinal = parse_ordinal(&name, &group)?;

        Ok(Self {
            name,
            group,
            namespace,
            ordinal,
        })
    }

    /// Construct an identity directly (used by tests and tools)
    pub fn new(group: &str, namespace: &str, ordinal: i64) -> Self {
        Self {
            name: format!("{}-{}", group, ordinal),
            group: group.to_string(),
            namespace: namespace.to_string(),
            ordinal,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ProxyError::Identity(format!("{} is not set", key))),
    }
}

/// Parse a replica ordinal from a pod name of the form `<group>-<n>`
pub fn parse_ordinal(name: &str, group: &str) -> Result<i64> {
    let suffix = name
        .strip_prefix(&format!("{}-", group))
        .ok_or_else(|| {
            ProxyError::Identity(format!(
                "pod name '{}' does not start with '{}-'",
                name, group
            ))
        })?;

    suffix.parse::<u32>().map(i64::from).map_err(|e| {
        ProxyError::Identity(format!("failed to parse ordinal in '{}': {}", name, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordinal_basic() {
        assert_eq!(parse_ordinal("proxy-0", "proxy").unwrap(), 0);
        assert_eq!(parse_ordinal("proxy-17", "proxy").unwrap(), 17);
    }

    #[test]
    fn test_parse_ordinal_group_with_dashes() {
        assert_eq!(parse_ordinal("edge-proxy-3", "edge-proxy").unwrap(), 3);
    }

    #[test]
    fn test_parse_ordinal_wrong_prefix() {
        let err = parse_ordinal("other-1", "proxy").unwrap_err();
        assert!(err.to_string().contains("does not start with"));
    }

    #[test]
    fn test_parse_ordinal_not_a_number() {
        assert!(parse_ordinal("proxy-abc", "proxy").is_err());
        assert!(parse_ordinal("proxy-", "proxy").is_err());
    }

    #[test]
    fn test_parse_ordinal_negative_rejected() {
        assert!(parse_ordinal("proxy--1", "proxy").is_err());
    }

    #[test]
    fn test_new_identity() {
        let id = ReplicaIdentity::new("proxy", "default", 2);
        assert_eq!(id.name, "proxy-2");
        assert_eq!(id.group, "proxy");
        assert_eq!(id.namespace, "default");
        assert_eq!(id.ordinal, 2);
    }
}
