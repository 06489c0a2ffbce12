/// Errors that can occur on the link layer.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] automato_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] automato_frame::FrameError),

    /// Nothing to send.
    #[error("refusing to send an empty payload to {to}")]
    EmptyPayload { to: u16 },
}

pub type Result<T> = std::result::Result<T, LinkError>;
