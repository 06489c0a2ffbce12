use std::fmt;
use std::io;

use automato_coordinator::{CoordinatorError, FlowError, StoreError};
use automato_event::EventError;
use automato_frame::FrameError;
use automato_module::ModuleError;
use automato_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const FILE_NOT_FOUND: i32 = 3;
pub const PERMISSION_DENIED: i32 = 4;
pub const CONFIG_INVALID: i32 = 30;
pub const TRANSPORT_FAILURE: i32 = 31;
pub const PROTOCOL_FAILURE: i32 = 32;
pub const VALIDATION_FAILED: i32 = 50;
pub const USAGE: i32 = 64;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound => FILE_NOT_FOUND,
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::UnexpectedEof => TRANSPORT_FAILURE,
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. }
        | TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source) => io_error(context, source),
        TransportError::Frame(err) => frame_error(context, err),
        other => CliError::new(TRANSPORT_FAILURE, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        other => CliError::new(PROTOCOL_FAILURE, format!("{context}: {other}")),
    }
}

pub fn event_error(context: &str, err: EventError) -> CliError {
    CliError::new(PROTOCOL_FAILURE, format!("{context}: {err}"))
}

fn store_error(context: &str, err: StoreError) -> CliError {
    match err {
        StoreError::Io { source, .. } => io_error(context, source),
        StoreError::Corrupt { .. } => CliError::new(VALIDATION_FAILED, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn flow_error(context: &str, err: FlowError) -> CliError {
    match err {
        FlowError::Io { source, .. } => io_error(context, source),
        FlowError::Store(err) => store_error(context, err),
        other => CliError::new(VALIDATION_FAILED, format!("{context}: {other}")),
    }
}

pub fn coordinator_error(context: &str, err: CoordinatorError) -> CliError {
    match err {
        CoordinatorError::MissingConfig(_)
        | CoordinatorError::ConfigRead { .. }
        | CoordinatorError::ConfigParse { .. } => {
            CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
        }
        CoordinatorError::Store(err) => store_error(context, err),
        CoordinatorError::Flow(err) => flow_error(context, err),
        CoordinatorError::Schema(_) | CoordinatorError::Json(_) => {
            CliError::new(VALIDATION_FAILED, format!("{context}: {err}"))
        }
        CoordinatorError::Transport(err) => transport_error(context, err),
        CoordinatorError::Link(_) => CliError::new(TRANSPORT_FAILURE, format!("{context}: {err}")),
        CoordinatorError::Io(source) => io_error(context, source),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn module_error(context: &str, err: ModuleError) -> CliError {
    match err {
        ModuleError::Transport(err) => transport_error(context, err),
        ModuleError::Link(_) | ModuleError::CheckInTimeout { .. } => {
            CliError::new(TRANSPORT_FAILURE, format!("{context}: {err}"))
        }
        ModuleError::Storage { source, .. } => io_error(context, source),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
