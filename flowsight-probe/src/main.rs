use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flowsight::capture::Capture;
use flowsight_probe::probe::Probe;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "flowsight-probe", version, about = "Sidecar network probe")]
struct Args {
    /// Interface to capture on
    #[arg(long, env = "INTERFACE", default_value = "eth0")]
    interface: String,

    /// Sink URL receiving flow batches
    #[arg(long, env = "LOGSTASH")]
    logstash: String,

    /// Seconds between flow container rotations
    #[arg(long, env = "SAMPLE_TIME", default_value_t = 30)]
    sample_time: u64,

    /// Optional BPF filter limiting the captured traffic
    #[arg(long, env = "BPF_FILTER")]
    filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    info!(
        interface = %args.interface,
        sink = %args.logstash,
        "starting flowsight-probe v{}",
        flowsight::VERSION
    );

    let mut capture =
        Capture::open(&args.interface).context("failed to open capture device")?;
    if let Some(filter) = &args.filter {
        capture.filter(filter).context("failed to set BPF filter")?;
    }

    let probe = Probe::new(
        capture.frames(),
        Duration::from_secs(args.sample_time),
        args.logstash,
    );

    let token = probe.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            token.cancel();
        }
    });

    probe.run().await.context("probe terminated")?;

    info!("flowsight-probe stopped");
    Ok(())
}
