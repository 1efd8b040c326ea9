use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowsightError {
    #[error("not an IP packet")]
    NotIpPacket,

    #[error("failed to extract conntrack event")]
    ConntrackParse,

    #[error("capture error: {0}")]
    Capture(String),

    #[error("capture exited")]
    CaptureExited,

    #[error("service watch exited")]
    ServiceWatchExited,

    #[error("conntrack event stream closed")]
    ConntrackExited,

    #[error("flow buffer full, dropping flows")]
    BufferFull,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlowsightError>;
