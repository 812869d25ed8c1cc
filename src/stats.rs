//! Periodic load summary, enabled by the `debugLevel` annotation

use crate::context::ProxyContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Emit a one-line load summary every 2 s while `debugLevel >= 1`
pub fn spawn_ticker(ctx: Arc<ProxyContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;

            let config = ctx.config();
            if config.debug_level < 1 {
                continue;
            }

            tracing::info!(
                proxies = ctx.view.count(),
                max = config.max_requests,
                target = config.soft_target(),
                denied = ctx.load.deny_count(),
                active = ctx.load.active(),
                "load summary"
            );
        }
    })
}
