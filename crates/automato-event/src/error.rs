/// Errors decoding values and events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// No bytes where an event or value was expected.
    #[error("empty input")]
    Empty,

    /// The 2-bit event discriminant is the unassigned value.
    #[error("event kind bits {0:#04b} do not name an event")]
    UnknownKind(u8),

    /// Fewer bytes than the header says the item occupies.
    #[error("truncated: need {needed} bytes, have {got}")]
    Truncated { needed: usize, got: usize },

    /// A primitive wire tag that has no tagged value counterpart.
    #[error("primitive tag {0} has no tagged value")]
    UnsupportedWireTag(u8),

    /// A text literal that does not parse as a value.
    #[error("invalid value literal {0:?}")]
    InvalidLiteral(String),

    /// An unknown conditional operator.
    #[error("unknown conditional {0:?}")]
    InvalidConditional(String),

    /// An unknown interval unit.
    #[error("unknown interval unit {0:?}")]
    InvalidIntervalUnit(String),
}

pub type Result<T> = std::result::Result<T, EventError>;
