//! Scaler — bounded replica-count updates with tail authority
//!
//! Only the tail replica (`ordinal + 1 == count`) may grow or shrink the
//! group, which keeps scale decisions race-free without leader election.
//! The tail check runs unlocked first, then again under the count mutex.

use crate::config::{ProxyConfig, SharedConfig};
use crate::error::{ProxyError, Result};
use crate::scaling::executor::ScaleApi;
use crate::view::GroupView;
use std::sync::Arc;

/// Bounded retry budget for one scale update
const SCALE_ATTEMPTS: u32 = 5;

/// Issues replica-count updates on behalf of this replica
pub struct Scaler {
    api: Arc<dyn ScaleApi>,
    ordinal: i64,
    config: SharedConfig,
    view: Arc<GroupView>,
}

impl Scaler {
    pub fn new(
        api: Arc<dyn ScaleApi>,
        ordinal: i64,
        config: SharedConfig,
        view: Arc<GroupView>,
    ) -> Self {
        Self {
            api,
            ordinal,
            config,
            view,
        }
    }

    fn config(&self) -> ProxyConfig {
        self.config.read().unwrap().clone()
    }

    fn is_tail(&self) -> bool {
        self.ordinal + 1 == self.view.count()
    }

    /// Update the replica count to `target`.
    ///
    /// The target is capped at `maxProxies`; a target equal to the current
    /// count or below `minProxies` is a no-op. Up to [`SCALE_ATTEMPTS`]
    /// attempts are made; exhausting them is fatal to the caller.
    ///
    /// Callers that act on tail authority must hold the count mutex.
    pub async fn request_scale(&self, target: i64) -> Result<()> {
        let config = self.config();

        let target = target.min(config.max_proxies);
        if target == self.view.count() || target < config.min_proxies {
            return Ok(());
        }

        tracing::debug!(
            replicas = target,
            executor = self.api.name(),
            "Attempting scale update"
        );

        let mut last_error = String::new();
        for attempt in 1..=SCALE_ATTEMPTS {
            match self.api.set_replicas(target as i32).await {
                Ok(()) => {
                    self.view.swap_count(target);
                    tracing::info!(replicas = target, attempt, "Replica count updated");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        replicas = target,
                        attempt,
                        error = %e,
                        "Scale update attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(ProxyError::ScaleExhausted {
            attempts: SCALE_ATTEMPTS,
            last_error,
        })
    }

    /// Grow the group by one if this replica is the tail and below the
    /// maximum. Returns whether a scale-up was issued.
    pub async fn scale_up_if_tail(&self) -> Result<bool> {
        let config = self.config();
        if !(self.view.count() + 1 <= config.max_proxies && self.is_tail()) {
            return Ok(false);
        }

        let _guard = self.view.count_mutex().lock().await;

        let config = self.config();
        if self.view.count() + 1 <= config.max_proxies && self.is_tail() {
            self.request_scale(self.ordinal + 2).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Shrink the group by one if this replica is the tail and above the
    /// minimum. Returns whether a scale-down was issued.
    pub async fn scale_down_if_tail(&self) -> Result<bool> {
        let config = self.config();
        if !(self.view.count() - 1 >= config.min_proxies && self.is_tail()) {
            return Ok(false);
        }

        let _guard = self.view.count_mutex().lock().await;

        let config = self.config();
        if self.view.count() - 1 >= config.min_proxies && self.is_tail() {
            self.request_scale(self.ordinal).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Grow the group to `desired` replicas (ensure-hint path; any replica
    /// may issue this, the scaler applies the bounds).
    pub async fn ensure_replicas(&self, desired: i64) -> Result<()> {
        if self.view.count() >= desired {
            return Ok(());
        }

        let _guard = self.view.count_mutex().lock().await;

        if self.view.count() < desired {
            self.request_scale(desired).await?;
        }

        Ok(())
    }

    /// After a config reload, pull the count back inside the new bounds.
    /// Only the tail replica enforces this.
    pub async fn clamp_to_bounds(&self) -> Result<()> {
        if !self.is_tail() {
            return Ok(());
        }

        let _guard = self.view.count_mutex().lock().await;

        if self.is_tail() {
            let config = self.config();
            let count = self.view.count();
            if count < config.min_proxies {
                self.request_scale(config.min_proxies).await?;
            } else if count > config.max_proxies {
                self.request_scale(config.max_proxies).await?;
            }
        }

        Ok(())
    }
}

/// Replica count needed to absorb `expected_requests` at the configured
/// per-replica soft target: `min(maxProxies, N / soft_target)`.
///
/// Returns None when the soft target rounds to zero (the hint cannot be
/// translated into a count).
pub fn desired_for_hint(config: &ProxyConfig, expected_requests: u64) -> Option<i64> {
    let per_replica = config.soft_target();
    if per_replica <= 0 {
        return None;
    }
    Some(config.max_proxies.min(expected_requests as i64 / per_replica))
}
