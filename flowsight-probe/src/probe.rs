//! Probe orchestration: capture, rotation and sink delivery.
//!
//! Three cooperating tasks share the active flow container under its mutex:
//! the capture task credits every parseable packet, the rotation task swaps
//! the container on each tick and hands the snapshot to the dump task, and
//! the dump task posts batches to the sink. The first fatal error wins and
//! cancels the peers; sink delivery is best-effort and lossy on backpressure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowsight::capture::{Frame, Sample};
use flowsight::event::{Encoder, Event};
use flowsight::flow::container::FlowContainer;
use flowsight::{FlowsightError, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Batches buffered between rotation and sink delivery; overflow drops a
/// whole rotation.
const DUMP_BUFFER: usize = 10;

/// Upper bound on a single sink post.
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Probe {
    sample_time: Duration,
    sink_url: String,
    container: Arc<Mutex<FlowContainer>>,
    encoder: Arc<Encoder>,
    frames: mpsc::Receiver<Frame>,
    exit: CancellationToken,
}

impl Probe {
    pub fn new(frames: mpsc::Receiver<Frame>, sample_time: Duration, sink_url: String) -> Probe {
        Probe {
            sample_time,
            sink_url,
            container: Arc::new(Mutex::new(FlowContainer::new())),
            encoder: Arc::new(Encoder::new()),
            frames,
            exit: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token stops all probe tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// Runs the capture, rotation and dump tasks until the first fatal error
    /// or cancellation. On error the peer tasks are cancelled before
    /// returning.
    pub async fn run(self) -> Result<()> {
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let (dump_tx, dump_rx) = mpsc::channel(DUMP_BUFFER);

        let client = reqwest::Client::builder()
            .timeout(SINK_TIMEOUT)
            .build()
            .map_err(|e| FlowsightError::Sink(e.to_string()))?;

        tokio::spawn(capture_task(
            self.frames,
            Arc::clone(&self.container),
            self.exit.clone(),
            err_tx.clone(),
        ));
        tokio::spawn(rotation_task(
            Arc::clone(&self.container),
            Arc::clone(&self.encoder),
            dump_tx,
            self.sample_time,
            self.exit.clone(),
            err_tx.clone(),
        ));
        tokio::spawn(dump_task(
            dump_rx,
            client,
            self.sink_url,
            self.exit.clone(),
            err_tx,
        ));

        // A closed channel means every task returned after cancellation.
        let result = match err_rx.recv().await {
            Some(err) => Err(err),
            None => Ok(()),
        };

        self.exit.cancel();
        result
    }
}

/// Drains the packet source into the active container. Unparseable packets
/// are dropped with a warning; a closed source is fatal.
async fn capture_task(
    mut frames: mpsc::Receiver<Frame>,
    container: Arc<Mutex<FlowContainer>>,
    exit: CancellationToken,
    err_tx: mpsc::UnboundedSender<FlowsightError>,
) {
    loop {
        tokio::select! {
            _ = exit.cancelled() => return,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    let _ = err_tx.send(FlowsightError::CaptureExited);
                    return;
                };
                match Sample::from_frame(&frame) {
                    Ok(sample) => {
                        container.lock().expect("flow container mutex poisoned").add(&sample);
                    }
                    Err(e) => warn!(error = %e, "dropping packet"),
                }
            }
        }
    }
}

/// Replaces the active container on every tick, forwarding the snapshot to
/// the dump task. A full dump channel is fatal.
async fn rotation_task(
    container: Arc<Mutex<FlowContainer>>,
    encoder: Arc<Encoder>,
    dump_tx: mpsc::Sender<Vec<Event>>,
    sample_time: Duration,
    exit: CancellationToken,
    err_tx: mpsc::UnboundedSender<FlowsightError>,
) {
    loop {
        tokio::select! {
            _ = exit.cancelled() => return,
            _ = tokio::time::sleep(sample_time) => {}
        }

        info!("creating new flow container");
        match rotate(&container, &encoder, &dump_tx) {
            Ok(()) => {}
            Err(FlowsightError::BufferFull) => {
                let _ = err_tx.send(FlowsightError::BufferFull);
            }
            // Dump task is gone; run() is already tearing down
            Err(_) => return,
        }
    }
}

/// Performs one rotation under the container mutex: converts the current
/// flows to events, attempts a non-blocking handoff to the dump task and
/// installs a fresh container. Any `add` acquiring the mutex afterwards
/// lands in the new container.
fn rotate(
    container: &Mutex<FlowContainer>,
    encoder: &Encoder,
    dump_tx: &mpsc::Sender<Vec<Event>>,
) -> Result<()> {
    let mut container = container.lock().expect("flow container mutex poisoned");

    let events = encoder.encode_all(&container.dump());
    let result = match dump_tx.try_send(events) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(FlowsightError::BufferFull),
        Err(TrySendError::Closed(_)) => Err(FlowsightError::Sink("dump channel closed".into())),
    };

    *container = FlowContainer::new();
    result
}

/// Posts event batches to the sink. Failures and non-200 responses lose the
/// batch and are logged with the record count; there is no retry.
async fn dump_task(
    mut dump_rx: mpsc::Receiver<Vec<Event>>,
    client: reqwest::Client,
    sink_url: String,
    exit: CancellationToken,
    _err_tx: mpsc::UnboundedSender<FlowsightError>,
) {
    loop {
        tokio::select! {
            _ = exit.cancelled() => return,
            batch = dump_rx.recv() => {
                let Some(events) = batch else { return };
                match client
                    .post(&sink_url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .json(&events)
                    .send()
                    .await
                {
                    Ok(response) if response.status() == reqwest::StatusCode::OK => {
                        info!(container_size = events.len(), "dumped container");
                    }
                    Ok(response) => {
                        error!(
                            records = events.len(),
                            status = %response.status(),
                            "failed to dump buffer, flow records lost"
                        );
                    }
                    Err(e) => {
                        error!(
                            records = events.len(),
                            error = %e,
                            "failed to dump buffer, flow records lost"
                        );
                    }
                }
            }
        }
    }
}
