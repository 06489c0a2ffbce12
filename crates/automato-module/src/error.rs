use std::path::PathBuf;

/// Errors from a module node.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Every command slot is taken.
    #[error("command registry full (max {max})")]
    RegistryFull { max: usize },

    /// A handler is already registered under this id.
    #[error("command {0} already registered")]
    DuplicateCommand(u8),

    /// The bytes do not start with a storable event.
    #[error("not a storable event blob: {0:02x?}")]
    InvalidEvent(Vec<u8>),

    /// Reading or writing module storage failed.
    #[error("storage error on {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No frame addressed to this node arrived before the deadline.
    #[error("coordinator did not answer check-in within {waited_ms} ms")]
    CheckInTimeout { waited_ms: u64 },

    #[error("event error: {0}")]
    Event(#[from] automato_event::EventError),

    #[error("link error: {0}")]
    Link(#[from] automato_link::LinkError),

    #[error("transport error: {0}")]
    Transport(#[from] automato_transport::TransportError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModuleError>;
