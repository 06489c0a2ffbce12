use crate::protocol::{MAX_UID, UID_BROADCAST};

const PRIORITY_SHIFT: u32 = 30;
const FRAGMENT_BIT: u32 = 1 << 29;
const FROM_SHIFT: u32 = 14;
const TO_SHIFT: u32 = 3;
const MARKER_BIT: u32 = 1;

/// Bus arbitration priority. Lower values win arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    Important = 1,
    Medium = 2,
    #[default]
    Normal = 3,
}

impl Priority {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Critical,
            1 => Self::Important,
            2 => Self::Medium,
            _ => Self::Normal,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Important => "important",
            Self::Medium => "medium",
            Self::Normal => "normal",
        }
    }
}

/// Sender, receiver and flags of a frame, packed into a 32-bit identifier.
///
/// Bit layout:
/// ```text
///  31 30 | 29       | 28..25 | 24 ........ 14 | 13 ......... 3 | 2 1 | 0
///  prio  | fragment | zero   | from (11 bits) | to (11 bits)   | 0 0 | 1
/// ```
///
/// An address whose `from` or `to` is zero packs to the all-zero identifier,
/// which the bus treats as "unaddressed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameAddress {
    pub from: u16,
    pub to: u16,
    pub priority: Priority,
    pub is_fragment: bool,
}

impl FrameAddress {
    pub fn new(from: u16, to: u16) -> Self {
        Self {
            from,
            to,
            priority: Priority::Normal,
            is_fragment: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_fragment(mut self, is_fragment: bool) -> Self {
        self.is_fragment = is_fragment;
        self
    }

    /// Pack into the 32-bit wire identifier.
    pub fn pack(&self) -> u32 {
        if self.from == 0 || self.to == 0 {
            return 0;
        }

        let mut id = (self.priority as u32) << PRIORITY_SHIFT;
        if self.is_fragment {
            id |= FRAGMENT_BIT;
        }
        id |= (u32::from(self.from) & u32::from(MAX_UID)) << FROM_SHIFT;
        id |= (u32::from(self.to) & u32::from(MAX_UID)) << TO_SHIFT;
        id | MARKER_BIT
    }

    /// Unpack a 32-bit wire identifier.
    pub fn unpack(id: u32) -> Self {
        Self {
            from: ((id >> FROM_SHIFT) & u32::from(MAX_UID)) as u16,
            to: ((id >> TO_SHIFT) & u32::from(MAX_UID)) as u16,
            priority: Priority::from_bits((id >> PRIORITY_SHIFT) as u8),
            is_fragment: id & FRAGMENT_BIT != 0,
        }
    }

    /// True when the frame is addressed to `uid` or to everyone.
    pub fn is_for(&self, uid: u16) -> bool {
        self.to == uid || self.is_broadcast()
    }

    /// True only when the frame is addressed to exactly `uid`.
    pub fn is_only_for(&self, uid: u16) -> bool {
        self.to == uid
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == UID_BROADCAST
    }
}
