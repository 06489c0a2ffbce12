use crate::protocol::GenericError;

/// Errors that can occur while encoding, decoding or reassembling frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame was declared with more than 8 payload bytes.
    #[error("frame length {0} exceeds 8 bytes")]
    LengthOutOfRange(usize),

    /// A serialized frame was longer than the 13-byte maximum.
    #[error("serialized frame too long ({size} bytes, max {max})")]
    SerializedTooLong { size: usize, max: usize },

    /// No free reassembly slot for a new fragment group.
    #[error("no free fragment slot for group {group_id}")]
    Busy { group_id: u8 },

    /// A fragment group grew past the per-group byte budget.
    #[error("fragment group {group_id} exceeded {max} bytes")]
    FrameTooLong { group_id: u8, max: usize },

    /// The wire stream contained a frame that could not be decoded.
    #[error("malformed wire frame: {0}")]
    MalformedWire(String),

    /// An I/O error occurred while reading or writing wire frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached EOF.
    #[error("stream closed")]
    ConnectionClosed,
}

impl FrameError {
    /// The bus-visible error code for this failure, if it has one.
    pub fn generic_error(&self) -> Option<GenericError> {
        match self {
            Self::Busy { .. } => Some(GenericError::Busy),
            Self::FrameTooLong { .. } => Some(GenericError::FrameTooLong),
            Self::LengthOutOfRange(_) | Self::SerializedTooLong { .. } => {
                Some(GenericError::FrameTooLong)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
