//! Idle self-retirement — a tail replica above the minimum exits after
//! sustained inactivity
//!
//! The watchdog evaluates the retirement predicate unlocked once a second,
//! then re-evaluates under the idle write lock before scaling down. Ordinal
//! 0 never retires, so the group never shrinks to nothing.

use crate::context::ProxyContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// May this replica retire right now?
pub fn should_retire(ctx: &ProxyContext) -> bool {
    let config = ctx.config();

    ctx.identity.ordinal != 0
        && ctx.identity.ordinal >= config.min_proxies
        && ctx.load.active() == 0
        && ctx.load.idle_for() >= Duration::from_secs(config.idle_timeout_secs)
}

/// Start the idle watchdog. Returns None for ordinal 0, which never retires.
pub fn spawn_watchdog(ctx: Arc<ProxyContext>) -> Option<JoinHandle<()>> {
    if ctx.identity.ordinal == 0 {
        return None;
    }

    ctx.load.touch();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;

            if !should_retire(&ctx) {
                continue;
            }

            // Writer side of the idle gate: no refresh may move the goalposts
            // between the recheck and the scale-down
            let _gate = ctx.load.idle_gate().write().await;

            if !should_retire(&ctx) {
                continue;
            }

            match ctx.scaler.scale_down_if_tail().await {
                Ok(true) => {
                    tracing::info!(
                        ordinal = ctx.identity.ordinal,
                        "Idle retirement: group scaled down, exiting"
                    );
                    std::process::exit(0);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Idle scale-down failed");
                    std::process::exit(1);
                }
            }
        }
    }))
}
