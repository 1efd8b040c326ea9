use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flowsight_inject::inject::{routes, Injector};
use k8s_openapi::api::core::v1::{Container, EnvVar};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LISTEN_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8443);

#[derive(Debug, Parser)]
#[command(
    name = "flowsight-inject",
    version,
    about = "Mutating admission webhook injecting the probe sidecar"
)]
struct Args {
    /// TLS certificate for the webhook listener
    #[arg(long, env = "TLS_CERT_FILE")]
    tls_cert_file: PathBuf,

    /// TLS private key for the webhook listener
    #[arg(long, env = "TLS_KEY_FILE")]
    tls_key_file: PathBuf,

    /// Image used for the injected probe sidecar
    #[arg(long, env = "PROBE_IMAGE")]
    probe_image: String,

    /// Sink URL passed to the injected probe
    #[arg(long, env = "LOGSTASH")]
    logstash: String,

    /// Namespace annotation enabling injection when set to "true"
    #[arg(long, env = "INJECT_ANNOTATION", default_value = "insight")]
    annotation: String,
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

    let sidecar = Container {
        name: "insight-sidecar-probe".to_string(),
        image: Some(args.probe_image),
        env: Some(vec![EnvVar {
            name: "LOGSTASH".to_string(),
            value: Some(args.logstash),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let injector = Injector::new(client, &args.annotation, sidecar)
        .context("failed to build injector")?;

    info!("start listening on :{}", LISTEN_ADDR.1);
    warp::serve(routes(Arc::new(injector)))
        .tls()
        .cert_path(&args.tls_cert_file)
        .key_path(&args.tls_key_file)
        .run(LISTEN_ADDR)
        .await;

    Ok(())
}
