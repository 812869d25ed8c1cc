//! Replica-group view — cached membership snapshot of the proxy group
//!
//! Holds the observed replica count (lock-free reads, mutations serialized
//! by the count mutex) and a reader/writer snapshot of the ready-peer list,
//! rendered as its canonical JSON form exactly once per update.

use crate::error::{ProxyError, Result};
use crate::identity::parse_ordinal;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use tokio::sync::Mutex;

/// A consistent read of the membership list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Canonical peers object literal: `{"<ordinal>":"<ip>",...}`
    pub peers_json: String,
    /// Resource revision the snapshot was built from
    pub version: String,
}

struct Membership {
    peers_json: String,
    version: String,
}

/// Shared view of the replica group
pub struct GroupView {
    count: AtomicI64,
    count_mu: Mutex<()>,
    membership: RwLock<Membership>,
}

impl GroupView {
    pub fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
            count_mu: Mutex::new(()),
            membership: RwLock::new(Membership {
                peers_json: "{}".to_string(),
                version: String::new(),
            }),
        }
    }

    /// Observed replica count (may lag behind the count mutex holder)
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Replace the observed count, returning the previous value
    pub fn swap_count(&self, count: i64) -> i64 {
        self.count.swap(count, Ordering::SeqCst)
    }

    /// The mutex serializing all count mutations (scale ops, refreshes)
    pub fn count_mutex(&self) -> &Mutex<()> {
        &self.count_mu
    }

    /// Read peers + version from the same snapshot
    pub fn snapshot(&self) -> ViewSnapshot {
        let m = self.membership.read().unwrap();
        ViewSnapshot {
            peers_json: m.peers_json.clone(),
            version: m.version.clone(),
        }
    }

    /// Swap in a freshly rendered membership list
    pub fn set_membership(&self, peers_json: String, version: String) {
        let mut m = self.membership.write().unwrap();
        m.peers_json = peers_json;
        m.version = version;
    }
}

impl Default for GroupView {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of rebuilding the view from orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebuilt {
    pub peers_json: String,
    pub version: String,
    /// Desired replica count from the StatefulSet spec
    pub desired_count: i64,
}

/// Rebuild the membership snapshot from a StatefulSet and its pod list.
///
/// Pods are ordered by parsed ordinal; only Running pods with a true Ready
/// condition are rendered. An empty pod list is an error: the group always
/// contains at least this replica.
pub fn rebuild(group: &str, set: &StatefulSet, pods: &[Pod]) -> Result<Rebuilt> {
    if pods.is_empty() {
        return Err(ProxyError::Orchestrator(format!(
            "found no pods in the group {}",
            group
        )));
    }

    let mut ordered: Vec<(i64, &Pod)> = Vec::with_capacity(pods.len());
    for pod in pods {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        ordered.push((parse_ordinal(name, group)?, pod));
    }
    ordered.sort_by_key(|(ordinal, _)| *ordinal);

    let ready: Vec<(i64, String)> = ordered
        .iter()
        .filter(|(_, pod)| is_ready(pod))
        .map(|(ordinal, pod)| {
            let ip = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default();
            (*ordinal, ip)
        })
        .collect();

    let version = set
        .metadata
        .resource_version
        .clone()
        .unwrap_or_default();

    let desired_count = set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0) as i64;

    Ok(Rebuilt {
        peers_json: render_peers(&ready),
        version,
        desired_count,
    })
}

/// Containers of the first (lowest-ordinal) pod, for the probe latch
pub fn first_pod_containers<'a>(
    group: &str,
    pods: &'a [Pod],
) -> Result<&'a [k8s_openapi::api::core::v1::Container]> {
    let mut first: Option<(i64, &Pod)> = None;
    for pod in pods {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let ordinal = parse_ordinal(name, group)?;
        if first.map_or(true, |(o, _)| ordinal < o) {
            first = Some((ordinal, pod));
        }
    }

    first
        .and_then(|(_, pod)| pod.spec.as_ref())
        .map(|spec| spec.containers.as_slice())
        .ok_or_else(|| ProxyError::Orchestrator(format!("no pod spec found in group {}", group)))
}

fn is_ready(pod: &Pod) -> bool {
    let status = match pod.status.as_ref() {
        Some(s) => s,
        None => return false,
    };

    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// Render the canonical peers object literal, ordinal-ascending
fn render_peers(peers: &[(i64, String)]) -> String {
    let mut out = String::from("{");
    for (i, (ordinal, ip)) in peers.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("\"{}\":\"{}\"", ordinal, ip));
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn make_pod(name: &str, ip: &str, phase: &str, ready: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: Some(ip.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn make_set(replicas: i32, version: &str) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // --- render_peers ---

    #[test]
    fn test_render_empty() {
        assert_eq!(render_peers(&[]), "{}");
    }

    #[test]
    fn test_render_single() {
        assert_eq!(
            render_peers(&[(0, "10.0.0.1".to_string())]),
            r#"{"0":"10.0.0.1"}"#
        );
    }

    #[test]
    fn test_render_preserves_numeric_order() {
        let peers: Vec<(i64, String)> = (0..11).map(|i| (i, format!("10.0.0.{}", i))).collect();
        let json = render_peers(&peers);
        // Ordinal 10 must come after 9, not after 1
        assert!(json.find("\"9\"").unwrap() < json.find("\"10\"").unwrap());
    }

    // --- rebuild ---

    #[test]
    fn test_rebuild_filters_not_ready() {
        let pods = vec![
            make_pod("proxy-0", "10.0.0.1", "Running", true),
            make_pod("proxy-1", "10.0.0.2", "Running", false),
            make_pod("proxy-2", "10.0.0.3", "Pending", true),
        ];
        let out = rebuild("proxy", &make_set(3, "v7"), &pods).unwrap();
        assert_eq!(out.peers_json, r#"{"0":"10.0.0.1"}"#);
        assert_eq!(out.version, "v7");
        assert_eq!(out.desired_count, 3);
    }

    #[test]
    fn test_rebuild_sorts_by_ordinal() {
        let pods = vec![
            make_pod("proxy-2", "10.0.0.3", "Running", true),
            make_pod("proxy-0", "10.0.0.1", "Running", true),
            make_pod("proxy-1", "10.0.0.2", "Running", true),
        ];
        let out = rebuild("proxy", &make_set(3, "v1"), &pods).unwrap();
        assert_eq!(
            out.peers_json,
            r#"{"0":"10.0.0.1","1":"10.0.0.2","2":"10.0.0.3"}"#
        );
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let pods = vec![
            make_pod("proxy-1", "10.0.0.2", "Running", true),
            make_pod("proxy-0", "10.0.0.1", "Running", true),
        ];
        let set = make_set(2, "v3");
        let a = rebuild("proxy", &set, &pods).unwrap();
        let b = rebuild("proxy", &set, &pods).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rebuild_empty_pod_list_is_error() {
        let err = rebuild("proxy", &make_set(1, "v1"), &[]).unwrap_err();
        assert!(err.to_string().contains("no pods"));
    }

    #[test]
    fn test_rebuild_bad_pod_name_is_error() {
        let pods = vec![make_pod("stranger-0", "10.0.0.1", "Running", true)];
        assert!(rebuild("proxy", &make_set(1, "v1"), &pods).is_err());
    }

    // --- first_pod_containers ---

    #[test]
    fn test_first_pod_by_ordinal() {
        let mut late = make_pod("proxy-1", "10.0.0.2", "Running", true);
        late.spec = Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![k8s_openapi::api::core::v1::Container {
                name: "late".into(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let mut early = make_pod("proxy-0", "10.0.0.1", "Running", true);
        early.spec = Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![k8s_openapi::api::core::v1::Container {
                name: "early".into(),
                ..Default::default()
            }],
            ..Default::default()
        });

        let pods = vec![late, early];
        let containers = first_pod_containers("proxy", &pods).unwrap();
        assert_eq!(containers[0].name, "early");
    }

    // --- GroupView ---

    #[test]
    fn test_view_defaults() {
        let view = GroupView::new();
        assert_eq!(view.count(), 0);
        let snap = view.snapshot();
        assert_eq!(snap.peers_json, "{}");
        assert_eq!(snap.version, "");
    }

    #[test]
    fn test_view_swap_count() {
        let view = GroupView::new();
        assert_eq!(view.swap_count(3), 0);
        assert_eq!(view.swap_count(2), 3);
        assert_eq!(view.count(), 2);
    }

    #[test]
    fn test_view_snapshot_pairs_fields() {
        let view = GroupView::new();
        view.set_membership(r#"{"0":"10.0.0.1"}"#.to_string(), "v42".to_string());
        let snap = view.snapshot();
        assert_eq!(snap.peers_json, r#"{"0":"10.0.0.1"}"#);
        assert_eq!(snap.version, "v42");
    }
}
