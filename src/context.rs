//! Shared root context passed to every handler and background task
//!
//! Identity, config, view, and counters are process-wide singletons; they
//! live behind one `Arc<ProxyContext>` instead of true globals.

use crate::admission::LoadState;
use crate::config::{ProxyConfig, SharedConfig};
use crate::error::Result;
use crate::forwarder::Forwarder;
use crate::identity::ReplicaIdentity;
use crate::scaling::{ScaleApi, Scaler};
use crate::view::GroupView;
use std::sync::{Arc, RwLock};

/// Root state shared by the HTTP surface, watcher, and watchdogs
pub struct ProxyContext {
    pub identity: ReplicaIdentity,
    pub config: SharedConfig,
    pub view: Arc<GroupView>,
    pub load: Arc<LoadState>,
    pub scaler: Arc<Scaler>,
    pub forwarder: Forwarder,
}

impl ProxyContext {
    /// Assemble the context around a scale executor
    pub fn new(identity: ReplicaIdentity, api: Arc<dyn ScaleApi>) -> Result<Arc<Self>> {
        let config: SharedConfig = Arc::new(RwLock::new(ProxyConfig::default()));
        let view = Arc::new(GroupView::new());
        let load = Arc::new(LoadState::new());
        let scaler = Arc::new(Scaler::new(
            api,
            identity.ordinal,
            config.clone(),
            view.clone(),
        ));
        let forwarder = Forwarder::new()?;

        Ok(Arc::new(Self {
            identity,
            config,
            view,
            load,
            scaler,
            forwarder,
        }))
    }

    /// Clone out the current configuration
    pub fn config(&self) -> ProxyConfig {
        self.config.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::MockScaleApi;

    #[test]
    fn test_context_construction() {
        let ctx = ProxyContext::new(
            ReplicaIdentity::new("proxy", "default", 1),
            Arc::new(MockScaleApi::new()),
        )
        .unwrap();

        assert_eq!(ctx.identity.ordinal, 1);
        assert_eq!(ctx.view.count(), 0);
        assert_eq!(ctx.load.active(), 0);
        assert_eq!(ctx.config().max_requests, 100);
    }
}
