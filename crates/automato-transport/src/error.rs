use std::path::PathBuf;

use automato_frame::FrameError;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open a serial device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to bind the local socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the local socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// An I/O error occurred on a transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding a wire frame failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The link behind an interface has gone away.
    #[error("interface {0} closed")]
    Closed(String),

    /// No more interfaces or forwarding rules can be added.
    #[error("interface set is full (max {max} {what})")]
    CapacityReached { what: &'static str, max: usize },

    /// A forwarding rule was rejected.
    #[error("invalid forwarding rule: {0}")]
    InvalidRule(String),

    /// An interface lock was poisoned by a panicking thread.
    #[error("interface {0} lock poisoned")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
