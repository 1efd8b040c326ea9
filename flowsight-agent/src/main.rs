use anyhow::{bail, Context, Result};
use clap::Parser;
use flowsight::cluster::{self, ClusterEvent};
use flowsight_agent::store::StateStore;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::api::Api;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "flowsight-agent",
    version,
    about = "Cluster agent mirroring workload state into Postgres"
)]
struct Args {
    /// Postgres connection string for the inventory database
    #[arg(long = "conn-string", env = "CONN_STRING")]
    conn_string: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    info!("starting flowsight-agent v{}", flowsight::VERSION);

    let client = kube::Client::try_default()
        .await
        .context("failed to connect to the Kubernetes API")?;
    info!("connection to Kubernetes cluster established");

    let store = StateStore::connect(&args.conn_string)
        .await
        .context("state store startup failed")?;

    let (tx, mut rx) = mpsc::channel::<ClusterEvent>(64);

    tokio::spawn(cluster::forward(
        Api::<Pod>::all(client.clone()),
        tx.clone(),
    ));
    tokio::spawn(cluster::forward(
        Api::<Service>::all(client.clone()),
        tx.clone(),
    ));
    tokio::spawn(cluster::forward(Api::<Endpoints>::all(client), tx));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    bail!("watch streams terminated");
                };
                store.handle_update(&event).await;
            }
        }
    }

    info!("flowsight-agent stopped");
    Ok(())
}
