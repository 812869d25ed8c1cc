//! Orchestrator watcher — keeps config and group view current
//!
//! One initial get+list refresh runs synchronously at startup (failures are
//! fatal); after that a long-lived subscription re-runs the full refresh on
//! every Added/Modified event. Refreshes are idempotent, so events are not
//! deduplicated. A dead or errored subscription reconnects immediately.

use crate::config::{self, ProxyConfig};
use crate::context::ProxyContext;
use crate::error::{ProxyError, Result};
use crate::view;
use futures_util::TryStreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use std::sync::Arc;

/// Subscribes to replica-set events and refreshes the shared state
pub struct Watcher {
    ctx: Arc<ProxyContext>,
    sets: Api<StatefulSet>,
    pods: Api<Pod>,
    selector: String,
}

impl Watcher {
    pub fn new(ctx: Arc<ProxyContext>, client: kube::Client) -> Self {
        let namespace = ctx.identity.namespace.clone();
        let selector = format!("component={}", ctx.identity.group);
        Self {
            ctx,
            sets: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client, &namespace),
            selector,
        }
    }

    /// Initial synchronous refresh; any failure here is fatal
    pub async fn bootstrap(&self) -> Result<()> {
        let set = self.sets.get(&self.ctx.identity.group).await.map_err(|e| {
            ProxyError::Orchestrator(format!(
                "failed to read initial state of {}: {}",
                self.ctx.identity.group, e
            ))
        })?;

        self.refresh(&set).await
    }

    /// Run the subscription loop forever, reconnecting on any termination
    pub async fn run(self) {
        loop {
            let params = WatchParams::default().labels(&self.selector);
            let stream = match self.sets.watch(&params, "0").await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "Watch subscription failed, reconnecting");
                    continue;
                }
            };
            tokio::pin!(stream);

            loop {
                match stream.try_next().await {
                    Ok(Some(WatchEvent::Added(set))) | Ok(Some(WatchEvent::Modified(set))) => {
                        tracing::debug!(
                            version = ?set.metadata.resource_version,
                            "Replica-set event"
                        );
                        match self.refresh(&set).await {
                            Ok(()) => {}
                            Err(e @ ProxyError::ScaleExhausted { .. }) => {
                                tracing::error!(error = %e, "Scale update exhausted retries");
                                std::process::exit(1);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Refresh failed, keeping current state");
                            }
                        }
                    }
                    Ok(Some(WatchEvent::Deleted(_))) | Ok(Some(WatchEvent::Bookmark(_))) => {}
                    Ok(Some(WatchEvent::Error(status))) => {
                        tracing::warn!(?status, "Watch stream error, reconnecting");
                        break;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Watch stream failed, reconnecting");
                        break;
                    }
                }
            }
        }
    }

    /// Full refresh: re-list pods, rebuild the view, re-apply annotations
    async fn refresh(&self, set: &StatefulSet) -> Result<()> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(&self.selector))
            .await
            .map_err(|e| {
                ProxyError::Orchestrator(format!("failed to list pods: {}", e))
            })?
            .items;

        self.latch_http_config(&pods)?;
        self.apply_membership(set, &pods).await?;
        self.apply_annotations(set).await?;

        Ok(())
    }

    /// Derive the listener port/path once from the readiness probe
    fn latch_http_config(&self, pods: &[Pod]) -> Result<()> {
        if self.ctx.config().http.is_latched() {
            return Ok(());
        }

        let containers = view::first_pod_containers(&self.ctx.identity.group, pods)?;
        let http = config::http_config_from_probe(containers)?;
        tracing::info!(port = http.port, path = http.path, "HTTP config latched from readiness probe");

        self.ctx.config.write().unwrap().http = http;
        Ok(())
    }

    /// Rebuild the peer list and observed count. A shrinking count restarts
    /// the idle clock, since this replica may just have become the tail.
    async fn apply_membership(&self, set: &StatefulSet, pods: &[Pod]) -> Result<()> {
        let rebuilt = view::rebuild(&self.ctx.identity.group, set, pods)?;
        self.ctx
            .view
            .set_membership(rebuilt.peers_json, rebuilt.version);

        // Reader side of the idle gate: retirement must not interleave
        let _gate = self.ctx.load.idle_gate().read().await;

        let old = self.ctx.view.swap_count(rebuilt.desired_count);
        if old != rebuilt.desired_count {
            if old > rebuilt.desired_count {
                self.ctx.load.touch();
            }
            tracing::debug!(from = old, to = rebuilt.desired_count, "Observed replica count");
        }

        Ok(())
    }

    /// Re-apply annotation config and enforce the new bounds from the tail
    async fn apply_annotations(&self, set: &StatefulSet) -> Result<()> {
        let annotations = set.metadata.annotations.clone().unwrap_or_default();
        let mut new_config = ProxyConfig::from_annotations(&annotations)?;

        {
            let _gate = self.ctx.load.idle_gate().read().await;
            let mut config = self.ctx.config.write().unwrap();

            if config::resets_idle_timer(&config, &new_config, self.ctx.identity.ordinal) {
                self.ctx.load.touch();
            }

            // Port and path never change after the latch
            new_config.http = config.http.clone();
            *config = new_config;
        }

        self.ctx.scaler.clamp_to_bounds().await
    }
}
