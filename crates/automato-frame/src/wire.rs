//! Start/stop framing for byte-stream links such as a serial port.
//!
//! ```text
//! ┌───────┬─────────────────────────────┬──────┐
//! │ START │ serialized frame (5..13 B)  │ STOP │
//! │ 0x02  │ id (4B LE), len, payload    │ 0x03 │
//! └───────┴─────────────────────────────┴──────┘
//! ```
//!
//! The decoder reads the header and then exactly `len` payload bytes, so
//! payload bytes equal to the markers need no escaping. Bytes seen outside a
//! frame are diagnostic text printed by the device and are reported line by
//! line.

use bytes::{BufMut, BytesMut};

use crate::codec::{Frame, HEADER_SIZE, MAX_PAYLOAD, MAX_SERIALIZED_SIZE};

/// Marks the start of a frame on the wire.
pub const START: u8 = 0x02;

/// Marks the end of a frame on the wire.
pub const STOP: u8 = 0x03;

/// Longest diagnostic line kept before it is flushed.
pub const MAX_TEXT_LINE: usize = 256;

/// Append the wire encoding of `frame` to `dst`.
pub fn encode_wire(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(frame.serialized_size() + 2);
    dst.put_u8(START);
    frame.serialize(dst);
    dst.put_u8(STOP);
}

/// Something the decoder recognised in the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Frame(Frame),
    /// A complete line of diagnostic text.
    Text(String),
    /// A partial frame was thrown away.
    Dropped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Header,
    Payload { remaining: usize },
    Stop,
}

/// Byte-at-a-time decoder for the start/stop wire format.
#[derive(Debug)]
pub struct WireDecoder {
    state: State,
    frame: BytesMut,
    text: BytesMut,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            frame: BytesMut::with_capacity(MAX_SERIALIZED_SIZE),
            text: BytesMut::with_capacity(MAX_TEXT_LINE),
        }
    }

    /// True while a frame has been started but not finished.
    pub fn in_frame(&self) -> bool {
        self.state != State::Idle
    }

    /// Feed one byte.
    pub fn push(&mut self, byte: u8) -> Option<WireEvent> {
        match self.state {
            State::Idle => self.push_idle(byte),
            State::Header => {
                self.frame.put_u8(byte);
                if self.frame.len() < HEADER_SIZE {
                    return None;
                }
                let len = self.frame[HEADER_SIZE - 1] as usize;
                if len > MAX_PAYLOAD {
                    self.state = State::Idle;
                    return Some(WireEvent::Dropped(format!(
                        "declared length {len} exceeds {MAX_PAYLOAD}"
                    )));
                }
                self.state = if len == 0 {
                    State::Stop
                } else {
                    State::Payload { remaining: len }
                };
                None
            }
            State::Payload { remaining } => {
                self.frame.put_u8(byte);
                self.state = if remaining == 1 {
                    State::Stop
                } else {
                    State::Payload {
                        remaining: remaining - 1,
                    }
                };
                None
            }
            State::Stop => {
                if byte == STOP {
                    self.state = State::Idle;
                    return Some(WireEvent::Frame(Frame::deserialize(&self.frame)));
                }
                self.begin_frame_if(byte == START);
                Some(WireEvent::Dropped(format!(
                    "expected stop marker, found {byte:#04x}"
                )))
            }
        }
    }

    fn push_idle(&mut self, byte: u8) -> Option<WireEvent> {
        if byte == START {
            self.begin_frame_if(true);
            return None;
        }
        if byte == b'\n' {
            return self.flush_text();
        }
        if byte != b'\r' {
            self.text.put_u8(byte);
        }
        if self.text.len() >= MAX_TEXT_LINE {
            return self.flush_text();
        }
        None
    }

    fn begin_frame_if(&mut self, start: bool) {
        self.frame.clear();
        self.state = if start { State::Header } else { State::Idle };
    }

    /// Return any buffered diagnostic text as a line.
    pub fn flush_text(&mut self) -> Option<WireEvent> {
        if self.text.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.text).into_owned();
        self.text.clear();
        Some(WireEvent::Text(line))
    }
}

impl Default for WireDecoder {
    fn default() -> Self {
        Self::new()
    }
}
