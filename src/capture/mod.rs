//! Packet capture
//!
//! Opens a libpcap handle on a container interface and streams raw frames
//! into a tokio channel from a dedicated reader thread. The channel closing
//! is the signal the probe uses to detect a dead capture source.

pub mod sample;

pub use sample::Sample;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{FlowsightError, Result};

/// Raw link-layer frame as handed over by libpcap.
pub type Frame = Vec<u8>;

/// Snapshot length covering jumbo frames.
const SNAPLEN: i32 = 9038;

/// Frames buffered between the reader thread and the probe.
const FRAME_BUFFER: usize = 1024;

pub struct Capture {
    handle: pcap::Capture<pcap::Active>,
    device: String,
}

impl Capture {
    /// Opens the device in promiscuous mode with a blocking-forever timeout.
    pub fn open(device: &str) -> Result<Capture> {
        let handle = pcap::Capture::from_device(device)
            .and_then(|cap| cap.snaplen(SNAPLEN).promisc(true).timeout(0).open())
            .map_err(|e| {
                error!(device, "could not open device");
                FlowsightError::Capture(e.to_string())
            })?;

        info!(device, "opened device");

        Ok(Capture {
            handle,
            device: device.to_string(),
        })
    }

    /// Installs a BPF filter on the handle.
    pub fn filter(&mut self, filter: &str) -> Result<()> {
        match self.handle.filter(filter, true) {
            Ok(()) => {
                info!(filter, "BPF filter set");
                Ok(())
            }
            Err(e) => {
                error!(filter, "could not set BPF filter");
                Err(FlowsightError::Capture(e.to_string()))
            }
        }
    }

    /// Consumes the handle and returns a channel producing every frame.
    ///
    /// The reader thread ends, closing the channel, when the handle reports
    /// a non-timeout error or the receiver is dropped.
    pub fn frames(self) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let device = self.device;
        let mut handle = self.handle;

        std::thread::spawn(move || {
            info!(device = %device, "starting packet stream");
            loop {
                match handle.next_packet() {
                    Ok(packet) => {
                        if tx.blocking_send(packet.data.to_vec()).is_err() {
                            return;
                        }
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        warn!(device = %device, error = %e, "packet stream closed");
                        return;
                    }
                }
            }
        });

        rx
    }
}
