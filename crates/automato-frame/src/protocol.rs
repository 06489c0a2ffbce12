//! Reserved protocol byte values.
//!
//! Bytes 128-145 are opcodes, 199 marks an invalid frame, 200-211 are
//! primitive type tags and 255 is the not-found sentinel. These values are
//! shared with every node on the bus and must never change.

/// Broadcast address; every node accepts frames sent here.
pub const UID_BROADCAST: u16 = 1;

/// The coordinator's address.
pub const UID_COORDINATOR: u16 = 2;

/// Secondary well-known service address.
pub const UID_SERVICE: u16 = 3;

/// First address handed out to modules.
pub const FIRST_MODULE_UID: u16 = 5;

/// Largest 11-bit address.
pub const MAX_UID: u16 = 0x7FF;

pub const ACKNOWLEDGEMENT: u8 = 128;
pub const CHECK_IN: u8 = 129;
pub const NEW_UID: u8 = 130;
pub const REPLY_NEW_UID: u8 = 131;
pub const UPDATE_INFO: u8 = 132;
pub const REPLY_UPDATE_INFO: u8 = 133;
pub const ERROR_GENERIC: u8 = 134;
pub const ERROR_MODULE: u8 = 135;
pub const COMMAND: u8 = 136;
pub const COMMAND_INPUT: u8 = 137;
pub const REPLY_COMMAND: u8 = 138;
pub const EVENT_ADD: u8 = 139;
pub const EVENT_REMOVE: u8 = 140;
pub const EVENT_REMOVE_ALL: u8 = 141;
pub const EVENT_SEND_STORED: u8 = 142;
pub const REPLY_EVENT_SEND_STORED: u8 = 143;
pub const EVENT_RUN_NEXT_PART: u8 = 144;
pub const FORMAT_STORAGE: u8 = 145;

/// Marks a frame that failed to deserialize.
pub const INVALID: u8 = 199;

/// Returned by lookups that found nothing.
pub const NOT_FOUND: u8 = 255;

/// Primitive type tags used when a value travels on the bus.
pub mod primitive {
    pub const U8: u8 = 200;
    pub const U16: u8 = 201;
    pub const U32: u8 = 202;
    pub const U64: u8 = 203;
    pub const I8: u8 = 204;
    pub const I16: u8 = 205;
    pub const I32: u8 = 206;
    pub const I64: u8 = 207;
    pub const F32: u8 = 208;
    pub const F64: u8 = 209;
    pub const BOOL: u8 = 210;
    pub const VOID: u8 = 211;
}

/// Width in bytes of a primitive tag's value. Unknown tags have width 0.
pub fn primitive_size(tag: u8) -> usize {
    match tag {
        primitive::U8 | primitive::I8 | primitive::BOOL => 1,
        primitive::U16 | primitive::I16 => 2,
        primitive::U32 | primitive::I32 | primitive::F32 => 4,
        primitive::U64 | primitive::I64 | primitive::F64 => 8,
        _ => 0,
    }
}

/// Error codes carried by `ERROR_GENERIC` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GenericError {
    NotReady = 1,
    UnknownError = 2,
    CommandNotFound = 3,
    IncompleteArguments = 4,
    InvalidArguments = 5,
    CommandNotAvailable = 6,
    Busy = 7,
    FrameTooLong = 8,
    ProtocolNotSupported = 9,
    FailedToReadMessage = 10,
}

impl GenericError {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::NotReady,
            2 => Self::UnknownError,
            3 => Self::CommandNotFound,
            4 => Self::IncompleteArguments,
            5 => Self::InvalidArguments,
            6 => Self::CommandNotAvailable,
            7 => Self::Busy,
            8 => Self::FrameTooLong,
            9 => Self::ProtocolNotSupported,
            10 => Self::FailedToReadMessage,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::CommandNotFound => "COMMAND_NOT_FOUND",
            Self::IncompleteArguments => "INCOMPLETE_ARGUMENTS",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::CommandNotAvailable => "COMMAND_NOT_AVAILABLE",
            Self::Busy => "BUSY",
            Self::FrameTooLong => "FRAME_TOO_LONG",
            Self::ProtocolNotSupported => "PROTOCOL_NOT_SUPPORTED",
            Self::FailedToReadMessage => "FAILED_TO_READ_MESSAGE",
        }
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns a human-readable name for a protocol byte.
pub fn opcode_name(byte: u8) -> &'static str {
    match byte {
        ACKNOWLEDGEMENT => "ACKNOWLEDGEMENT",
        CHECK_IN => "CHECK_IN",
        NEW_UID => "NEW_UID",
        REPLY_NEW_UID => "REPLY_NEW_UID",
        UPDATE_INFO => "UPDATE_INFO",
        REPLY_UPDATE_INFO => "REPLY_UPDATE_INFO",
        ERROR_GENERIC => "ERROR_GENERIC",
        ERROR_MODULE => "ERROR_MODULE",
        COMMAND => "COMMAND",
        COMMAND_INPUT => "COMMAND_INPUT",
        REPLY_COMMAND => "REPLY_COMMAND",
        EVENT_ADD => "EVENT_ADD",
        EVENT_REMOVE => "EVENT_REMOVE",
        EVENT_REMOVE_ALL => "EVENT_REMOVE_ALL",
        EVENT_SEND_STORED => "EVENT_SEND_STORED",
        REPLY_EVENT_SEND_STORED => "REPLY_EVENT_SEND_STORED",
        EVENT_RUN_NEXT_PART => "EVENT_RUN_NEXT_PART",
        FORMAT_STORAGE => "FORMAT_STORAGE",
        INVALID => "INVALID",
        200..=211 => "PRIMITIVE",
        NOT_FOUND => "NOT_FOUND",
        _ => "UNKNOWN",
    }
}

/// Returns true if the byte is a protocol opcode.
pub fn is_opcode(byte: u8) -> bool {
    (ACKNOWLEDGEMENT..=FORMAT_STORAGE).contains(&byte)
}
