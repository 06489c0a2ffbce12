//! The compact event encoding.
//!
//! Byte 0 packs the kind (bits 7..6), the conditional (bits 5..3) and the
//! compare value's type (bits 2..0); Command events only set the kind bits.
//! Bytes 1 and 2 are the flow id and the target command id. The rest
//! depends on the kind:
//!
//! | kind    | byte 3        | byte 4    | byte 5   | value at | size  |
//! |---------|---------------|-----------|----------|----------|-------|
//! | Main    | unit << 6     | interval  |          | 5        | 5 + w |
//! | If      | section       | if true   | if false | 6        | 6 + w |
//! | Command | section       | next      |          |          | 5     |

use serde::Serialize;

use crate::conditional::Conditional;
use crate::error::{EventError, Result};
use crate::interval::{interval_ms, IntervalUnit};
use crate::value::{TaggedValue, ValueType};

pub const COMMAND_SIZE: usize = 5;
pub const MAIN_MIN_SIZE: usize = 5;
pub const IF_MIN_SIZE: usize = 6;
/// Largest encoded event (If with an 8 byte value).
pub const MAX_SIZE: usize = IF_MIN_SIZE + 8;

const KIND_SHIFT: u8 = 6;
const CONDITIONAL_SHIFT: u8 = 3;
const UNIT_SHIFT: u8 = 6;

/// The 2-bit event discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKind {
    Main = 0,
    Command = 1,
    If = 2,
}

impl EventKind {
    pub fn from_header(byte: u8) -> Result<Self> {
        match byte >> KIND_SHIFT {
            0 => Ok(Self::Main),
            1 => Ok(Self::Command),
            2 => Ok(Self::If),
            other => Err(EventError::UnknownKind(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Command => "command",
            Self::If => "if",
        }
    }
}

/// The trigger of a flow: polled on an interval, fires section 1 on a match.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MainEvent {
    pub flow_id: u8,
    pub function_id: u8,
    pub interval_unit: IntervalUnit,
    pub interval: u8,
    pub conditional: Conditional,
    pub compare_to: TaggedValue,
}

impl MainEvent {
    pub fn interval_ms(&self) -> u64 {
        interval_ms(self.interval_unit, self.interval)
    }
}

/// A branch: runs its command and continues at one of two sections.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IfEvent {
    pub flow_id: u8,
    pub function_id: u8,
    pub section: u8,
    pub if_true: u8,
    pub if_false: u8,
    pub conditional: Conditional,
    pub compare_to: TaggedValue,
}

/// A step: runs its command and continues at `next_section` (0 ends the flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CommandEvent {
    pub flow_id: u8,
    pub function_id: u8,
    pub section: u8,
    pub next_section: u8,
}

/// One encoded unit of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Main(MainEvent),
    If(IfEvent),
    Command(CommandEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Main(_) => EventKind::Main,
            Self::If(_) => EventKind::If,
            Self::Command(_) => EventKind::Command,
        }
    }

    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main(_))
    }

    pub fn flow_id(&self) -> u8 {
        match self {
            Self::Main(e) => e.flow_id,
            Self::If(e) => e.flow_id,
            Self::Command(e) => e.flow_id,
        }
    }

    pub fn set_flow_id(&mut self, flow_id: u8) {
        match self {
            Self::Main(e) => e.flow_id = flow_id,
            Self::If(e) => e.flow_id = flow_id,
            Self::Command(e) => e.flow_id = flow_id,
        }
    }

    pub fn with_flow_id(mut self, flow_id: u8) -> Self {
        self.set_flow_id(flow_id);
        self
    }

    pub fn function_id(&self) -> u8 {
        match self {
            Self::Main(e) => e.function_id,
            Self::If(e) => e.function_id,
            Self::Command(e) => e.function_id,
        }
    }

    /// Section number within the flow. Main events are section 0.
    pub fn section(&self) -> u8 {
        match self {
            Self::Main(_) => 0,
            Self::If(e) => e.section,
            Self::Command(e) => e.section,
        }
    }

    pub fn serialized_size(&self) -> usize {
        match self {
            Self::Main(e) => MAIN_MIN_SIZE + e.compare_to.width(),
            Self::If(e) => IF_MIN_SIZE + e.compare_to.width(),
            Self::Command(_) => COMMAND_SIZE,
        }
    }

    /// Append the encoded event to `dst`.
    pub fn serialize(&self, dst: &mut Vec<u8>) {
        let kind = (self.kind() as u8) << KIND_SHIFT;
        match self {
            Self::Main(e) => {
                dst.extend_from_slice(&[
                    kind | value_header(e.conditional, &e.compare_to),
                    e.flow_id,
                    e.function_id,
                    e.interval_unit.bits() << UNIT_SHIFT,
                    e.interval,
                ]);
                e.compare_to.encode(dst);
            }
            Self::If(e) => {
                dst.extend_from_slice(&[
                    kind | value_header(e.conditional, &e.compare_to),
                    e.flow_id,
                    e.function_id,
                    e.section,
                    e.if_true,
                    e.if_false,
                ]);
                e.compare_to.encode(dst);
            }
            Self::Command(e) => {
                dst.extend_from_slice(&[kind, e.flow_id, e.function_id, e.section, e.next_section]);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.serialize(&mut out);
        out
    }

    /// Encoding with the flow id cleared.
    ///
    /// Two Main events with equal identity bytes trigger the same flow no
    /// matter which id either was stored under.
    pub fn identity_bytes(&self) -> Vec<u8> {
        self.with_flow_id(0).to_bytes()
    }

    /// Decode one event from the front of `src`. Trailing bytes are ignored.
    pub fn deserialize(src: &[u8]) -> Result<Self> {
        let header = *src.first().ok_or(EventError::Empty)?;
        let kind = EventKind::from_header(header)?;
        let needed = peek_serialized_length(src);
        if src.len() < needed {
            return Err(EventError::Truncated {
                needed,
                got: src.len(),
            });
        }

        let conditional = Conditional::from_bits(header >> CONDITIONAL_SHIFT);
        let value_type = ValueType::from_bits(header);
        Ok(match kind {
            EventKind::Command => Self::Command(CommandEvent {
                flow_id: src[1],
                function_id: src[2],
                section: src[3],
                next_section: src[4],
            }),
            EventKind::Main => Self::Main(MainEvent {
                flow_id: src[1],
                function_id: src[2],
                interval_unit: IntervalUnit::from_bits(src[3] >> UNIT_SHIFT),
                interval: src[4],
                conditional,
                compare_to: TaggedValue::decode(value_type, &src[MAIN_MIN_SIZE..])?,
            }),
            EventKind::If => Self::If(IfEvent {
                flow_id: src[1],
                function_id: src[2],
                section: src[3],
                if_true: src[4],
                if_false: src[5],
                conditional,
                compare_to: TaggedValue::decode(value_type, &src[IF_MIN_SIZE..])?,
            }),
        })
    }
}

fn value_header(conditional: Conditional, value: &TaggedValue) -> u8 {
    (conditional.bits() << CONDITIONAL_SHIFT) | value.value_type().bits()
}

/// Size of the event starting at `src[0]`, read from the header byte alone.
///
/// Returns 0 when `src` is empty or the kind bits do not name an event.
pub fn peek_serialized_length(src: &[u8]) -> usize {
    let Some(&header) = src.first() else {
        return 0;
    };
    match EventKind::from_header(header) {
        Ok(EventKind::Command) => COMMAND_SIZE,
        Ok(EventKind::Main) => MAIN_MIN_SIZE + ValueType::from_bits(header).width(),
        Ok(EventKind::If) => IF_MIN_SIZE + ValueType::from_bits(header).width(),
        Err(_) => 0,
    }
}

/// Walk a packed event stream.
///
/// Yields each event's bytes in order. A `0x00` byte is an empty slot and is
/// skipped. Scanning stops at a header that does not name an event or at an
/// event cut short by the end of the stream.
pub fn scan_stream(stream: &[u8]) -> StreamScan<'_> {
    StreamScan { stream, offset: 0 }
}

pub struct StreamScan<'a> {
    stream: &'a [u8],
    offset: usize,
}

impl StreamScan<'_> {
    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes not yet consumed. Non-empty after iteration ends means the tail
    /// was corrupt or truncated.
    pub fn remaining(&self) -> usize {
        self.stream.len().saturating_sub(self.offset)
    }
}

impl<'a> Iterator for StreamScan<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.stream.get(self.offset) == Some(&0) {
            self.offset += 1;
        }
        let rest = self.stream.get(self.offset..)?;
        let size = peek_serialized_length(rest);
        if size == 0 || rest.len() < size {
            return None;
        }
        self.offset += size;
        Some(&rest[..size])
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main(e) => write!(
                f,
                "main flow {} every {} {}: command {} {} {} ({})",
                e.flow_id,
                e.interval,
                e.interval_unit,
                e.function_id,
                e.conditional,
                e.compare_to,
                e.compare_to.value_type()
            ),
            Self::If(e) => write!(
                f,
                "if flow {} section {}: command {} {} {} ({}) then {} else {}",
                e.flow_id,
                e.section,
                e.function_id,
                e.conditional,
                e.compare_to,
                e.compare_to.value_type(),
                e.if_true,
                e.if_false
            ),
            Self::Command(e) => write!(
                f,
                "command flow {} section {}: command {} then {}",
                e.flow_id, e.section, e.function_id, e.next_section
            ),
        }
    }
}
