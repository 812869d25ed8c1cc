use clap::Parser;
use flock_proxy::scaling::KubeScaleApi;
use flock_proxy::watcher::Watcher;
use flock_proxy::{idle, server, stats, ProxyContext, ReplicaIdentity};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// flock-proxy — self-scaling forwarding proxy for ordered replica groups
#[derive(Parser)]
#[command(name = "flock-proxy", version, about)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("flock-proxy v{}", env!("CARGO_PKG_VERSION"));

    // Identity comes from the pod environment and never changes
    let identity = ReplicaIdentity::from_env()?;
    tracing::info!(
        name = identity.name,
        namespace = identity.namespace,
        group = identity.group,
        ordinal = identity.ordinal,
        "Replica identity"
    );

    // In-cluster orchestrator client, shared by the watcher and scaler
    let client = kube::Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create orchestrator client: {}", e))?;

    let scale_api = Arc::new(KubeScaleApi::new(
        client.clone(),
        &identity.namespace,
        &identity.group,
    ));
    let ctx = ProxyContext::new(identity, scale_api)?;

    // Initial refresh is synchronous so the HTTP config is latched before
    // the listener starts; failures here are fatal
    let watcher = Watcher::new(ctx.clone(), client);
    watcher.bootstrap().await?;
    tokio::spawn(watcher.run());

    idle::spawn_watchdog(ctx.clone());
    stats::spawn_ticker(ctx.clone());

    // The HTTP surface runs on the caller's task; its failure is fatal
    server::run(ctx).await?;

    Ok(())
}
