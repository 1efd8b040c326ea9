use anyhow::{Context, Result};
use clap::Parser;
use flowsight_resolver::cache::MemcachedCache;
use flowsight_resolver::resolver::Resolver;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "flowsight-resolver",
    version,
    about = "NAT resolver publishing service-address replacement records"
)]
struct Args {
    /// memcached endpoint (host:port) receiving replacement records
    #[arg(long = "memcached", env = "INSIGHT_MEMCACHED_PORT_11211_TCP")]
    memcached: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let client = kube::Client::try_default()
        .await
        .context("failed to connect to the Kubernetes API")?;
    info!("connection to Kubernetes cluster established");

    // Service env vars may carry a tcp:// scheme prefix
    let addr = args
        .memcached
        .strip_prefix("tcp://")
        .unwrap_or(&args.memcached);
    let cache = MemcachedCache::connect(addr)
        .with_context(|| format!("lookup cache {addr} is unreachable"))?;
    info!(addr, "connected to lookup cache");

    let resolver = Resolver::new(client, cache);

    let token = resolver.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            token.cancel();
        }
    });

    resolver.run().await.context("resolver terminated")?;

    info!("flowsight-resolver stopped");
    Ok(())
}
