use std::path::PathBuf;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The snapshot file could not be read or written.
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot file is not a valid store snapshot.
    #[error("corrupt store snapshot {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A row with the same key already exists.
    #[error("{what} {key} already exists")]
    Duplicate { what: &'static str, key: String },

    /// The row to update does not exist.
    #[error("{what} {key} not found")]
    NotFound { what: &'static str, key: String },
}

/// Errors validating a module self-description.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The embedded schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The payload failed schema validation.
    #[error("self-description from {uid} is invalid: {message}")]
    ValidationFailed { uid: u16, message: String },

    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors turning a parsed flow file entry into events.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("unknown module {0:?}")]
    UnknownModule(String),

    #[error("module {module:?} has no command {function:?}")]
    UnknownCommand { module: String, function: String },

    #[error("section {section} is missing {field}")]
    MissingField { section: u8, field: &'static str },

    #[error("section {section}: {source}")]
    InvalidField {
        section: u8,
        source: automato_event::EventError,
    },

    #[error("interval {0:?} is not a number between 0 and 255")]
    InvalidInterval(String),

    #[error("flow has no main event")]
    NoMainEvent,

    #[error("flow has {0} main events")]
    MultipleMainEvents(usize),

    /// The flow file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The flow file is not valid JSON.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from a flow synchronization pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Every flow id from 1 to 255 is taken.
    #[error("no flow ids left (max {max})")]
    FlowIdsExhausted { max: u8 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level coordinator errors.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A required configuration value is absent.
    #[error("missing required configuration value `{0}`")]
    MissingConfig(&'static str),

    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("link error: {0}")]
    Link(#[from] automato_link::LinkError),

    #[error("transport error: {0}")]
    Transport(#[from] automato_transport::TransportError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A runtime thread panicked or a lock was poisoned.
    #[error("runtime failure: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
