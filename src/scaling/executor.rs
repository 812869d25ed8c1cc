//! Scale executors — trait and implementations for replica-count updates
//!
//! `KubeScaleApi` drives the StatefulSet scale subresource; `MockScaleApi`
//! records targets in memory for tests. One `set_replicas` call is one
//! attempt: fetch the current scale, set both desired and status replicas,
//! submit the update. Retry policy lives in the [`Scaler`](super::Scaler).

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::{ProxyError, Result};

/// One-attempt interface to the orchestrator's scale subresource
#[async_trait]
pub trait ScaleApi: Send + Sync {
    /// Set the replica count to `target` (single attempt)
    async fn set_replicas(&self, target: i32) -> Result<()>;

    /// Executor name (for logging)
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// KubeScaleApi — the real scale subresource
// ---------------------------------------------------------------------------

/// Scale executor backed by the StatefulSet scale subresource
pub struct KubeScaleApi {
    client: kube::Client,
    namespace: String,
    statefulset: String,
}

impl KubeScaleApi {
    pub fn new(client: kube::Client, namespace: &str, statefulset: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            statefulset: statefulset.to_string(),
        }
    }
}

#[async_trait]
impl ScaleApi for KubeScaleApi {
    async fn set_replicas(&self, target: i32) -> Result<()> {
        use k8s_openapi::api::apps::v1::StatefulSet;
        use k8s_openapi::api::autoscaling::v1::{ScaleSpec, ScaleStatus};
        use kube::api::{Api, PostParams};

        let sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut scale = sets.get_scale(&self.statefulset).await.map_err(|e| {
            ProxyError::Orchestrator(format!(
                "failed to get scale of {}/{}: {}",
                self.namespace, self.statefulset, e
            ))
        })?;

        scale.spec = Some(ScaleSpec {
            replicas: Some(target),
        });
        match scale.status.as_mut() {
            Some(status) => status.replicas = target,
            None => {
                scale.status = Some(ScaleStatus {
                    replicas: target,
                    ..Default::default()
                })
            }
        }

        let body = serde_json::to_vec(&scale)
            .map_err(|e| ProxyError::Orchestrator(format!("failed to encode scale: {}", e)))?;

        sets.replace_scale(&self.statefulset, &PostParams::default(), body)
            .await
            .map_err(|e| {
                ProxyError::Orchestrator(format!(
                    "failed to update scale of {}/{}: {}",
                    self.namespace, self.statefulset, e
                ))
            })?;

        Ok(())
    }

    fn name(&self) -> &str {
        "kube"
    }
}

// ---------------------------------------------------------------------------
// MockScaleApi — records targets for testing
// ---------------------------------------------------------------------------

/// In-memory scale executor that records every accepted target
pub struct MockScaleApi {
    targets: Arc<Mutex<Vec<i32>>>,
    /// Number of leading calls that fail before succeeding
    failures: Arc<Mutex<u32>>,
}

impl MockScaleApi {
    pub fn new() -> Self {
        Self {
            targets: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail the next `n` calls with a transient error
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap() = n;
    }

    /// All targets accepted so far, in call order
    pub fn targets(&self) -> Vec<i32> {
        self.targets.lock().unwrap().clone()
    }
}

impl Default for MockScaleApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScaleApi for MockScaleApi {
    async fn set_replicas(&self, target: i32) -> Result<()> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProxyError::Orchestrator("injected failure".into()));
            }
        }
        self.targets.lock().unwrap().push(target);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
