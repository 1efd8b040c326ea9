//! NAT resolver: service watch + conntrack stream -> replacement records.

use std::process::Stdio;
use std::sync::Arc;

use flowsight::cluster::{self, ServiceIpSet};
use flowsight::conntrack::{ConntrackEvent, ConntrackKind, Parser};
use flowsight::flow::community_id::Hasher;
use flowsight::{FlowsightError, Result};
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Expiry for records of live connections.
const TTL_NEW: u32 = 3600;

/// Short expiry on DESTROY, leaving the enrichment pipeline time to resolve
/// flows that are still in flight.
const TTL_DESTROY: u32 = 30;

/// Tracks the cluster's virtual service addresses and publishes pre-NAT to
/// post-NAT identity mappings derived from conntrack events.
pub struct Resolver<C> {
    watcher: Arc<ServiceIpSet>,
    client: kube::Client,
    cache: Arc<C>,
    exit: CancellationToken,
}

impl<C: crate::cache::ReplacementCache + 'static> Resolver<C> {
    pub fn new(client: kube::Client, cache: C) -> Resolver<C> {
        Resolver {
            watcher: Arc::new(ServiceIpSet::new()),
            client,
            cache: Arc::new(cache),
            exit: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token stops both resolver tasks and kills the
    /// conntrack child process.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// Runs the service-watch and conntrack tasks until the first fatal
    /// error or cancellation.
    pub async fn run(self) -> Result<()> {
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        let services: Api<Service> = Api::all(self.client.clone());
        tokio::spawn(service_task(
            services,
            Arc::clone(&self.watcher),
            self.exit.clone(),
            err_tx.clone(),
        ));
        tokio::spawn(conntrack_task(
            Arc::clone(&self.watcher),
            Arc::clone(&self.cache),
            self.exit.clone(),
            err_tx,
        ));

        let result = match err_rx.recv().await {
            Some(err) => Err(err),
            None => Ok(()),
        };

        self.exit.cancel();
        result
    }
}

/// Forwards the service watch stream into the service-IP set. A closed
/// stream is fatal.
async fn service_task(
    api: Api<Service>,
    watcher: Arc<ServiceIpSet>,
    exit: CancellationToken,
    err_tx: mpsc::UnboundedSender<FlowsightError>,
) {
    let (tx, mut rx) = mpsc::channel(16);
    let forward = tokio::spawn(cluster::forward(api, tx));

    loop {
        tokio::select! {
            _ = exit.cancelled() => {
                forward.abort();
                return;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    let err = match forward.await {
                        Ok(Err(e)) => e,
                        _ => FlowsightError::ServiceWatchExited,
                    };
                    let _ = err_tx.send(err);
                    return;
                };
                watcher.handle_event(&event);
            }
        }
    }
}

/// Spawns `conntrack -E` and feeds every parseable event line into the
/// handler. A dead child or read failure is fatal; the child is killed on
/// cancellation.
async fn conntrack_task<C: crate::cache::ReplacementCache>(
    watcher: Arc<ServiceIpSet>,
    cache: Arc<C>,
    exit: CancellationToken,
    err_tx: mpsc::UnboundedSender<FlowsightError>,
) {
    let mut child = match Command::new("conntrack")
        .arg("-E")
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = err_tx.send(e.into());
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = err_tx.send(FlowsightError::ConntrackExited);
        return;
    };

    info!("conntrack event stream started");

    let mut lines = BufReader::new(stdout).lines();
    let parser = Parser::new();
    let hasher = Hasher::new(0);

    loop {
        tokio::select! {
            _ = exit.cancelled() => {
                let _ = child.kill().await;
                return;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        // Lines outside the event grammar are dropped silently
                        if let Ok(event) = parser.parse_line(&line) {
                            handle_conntrack_event(&hasher, &watcher, cache.as_ref(), &event);
                        }
                    }
                    Ok(None) => {
                        let _ = err_tx.send(FlowsightError::ConntrackExited);
                        return;
                    }
                    Err(e) => {
                        let _ = err_tx.send(e.into());
                        return;
                    }
                }
            }
        }
    }
}

/// Publishes a replacement record for a conntrack event whose original
/// destination is a virtual service address.
///
/// The record is keyed by the pre-NAT Community-ID and points at the
/// reply-side source, which is the backend the data plane rewrote the
/// connection to. UPDATE events are ignored.
pub fn handle_conntrack_event<C: crate::cache::ReplacementCache>(
    hasher: &Hasher,
    service_ips: &ServiceIpSet,
    cache: &C,
    event: &ConntrackEvent,
) {
    if !service_ips.is_service_ip(event.original.dst) {
        return;
    }

    let expiration = match event.kind {
        ConntrackKind::New => TTL_NEW,
        ConntrackKind::Destroy => TTL_DESTROY,
        ConntrackKind::Update => return,
    };

    let key = hasher.hash(&event.original);
    let record = crate::cache::ClusterIpMap {
        community_id: hasher.hash(&event.reply),
        replace_ip: event.reply.src,
        replace_port: event.reply.src_port,
    };

    match cache.set(&key, &record, expiration) {
        Ok(()) => debug!(key = %key, kind = ?event.kind, "published replacement record"),
        Err(e) => error!(key = %key, error = %e, "failed to publish replacement record"),
    }
}
