use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::id::FrameAddress;
use crate::protocol::INVALID;

/// Largest payload a single frame carries.
pub const MAX_PAYLOAD: usize = 8;

/// Serialized header: identifier (4) + length (1).
pub const HEADER_SIZE: usize = 5;

/// Largest serialized frame: header + 8 payload bytes.
pub const MAX_SERIALIZED_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD;

/// One bus frame: an address plus up to 8 payload bytes.
///
/// Payload bytes past `len()` are always zero, except for the invalid frame
/// produced by a failed decode, whose first byte holds [`INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub address: FrameAddress,
    len: u8,
    bytes: [u8; MAX_PAYLOAD],
}

impl Frame {
    /// Create a frame, rejecting payloads longer than 8 bytes.
    pub fn new(address: FrameAddress, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::LengthOutOfRange(payload.len()));
        }
        let mut bytes = [0u8; MAX_PAYLOAD];
        bytes[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            address,
            len: payload.len() as u8,
            bytes,
        })
    }

    /// The frame returned when decoding fails.
    pub fn invalid() -> Self {
        let mut bytes = [0u8; MAX_PAYLOAD];
        bytes[0] = INVALID;
        Self {
            address: FrameAddress::default(),
            len: 0,
            bytes,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.len == 0 && self.bytes[0] == INVALID && self.address.pack() == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte at `index`, zero past the payload.
    pub fn byte(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }

    /// The protocol byte of this frame. Fragments carry their group id in
    /// byte 0, so the protocol byte moves to byte 1.
    pub fn command_byte(&self) -> u8 {
        self.bytes[usize::from(self.address.is_fragment)]
    }

    /// Number of bytes this frame occupies once serialized.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.len()
    }

    /// Serialize into `dst`.
    ///
    /// Layout:
    /// ```text
    /// ┌───────────────────┬──────────┬─────────────────────┐
    /// │ Identifier (4B LE)│ Len (1B) │ Payload (Len bytes) │
    /// └───────────────────┴──────────┴─────────────────────┘
    /// ```
    pub fn serialize(&self, dst: &mut BytesMut) {
        dst.reserve(self.serialized_size());
        dst.put_u32_le(self.address.pack());
        dst.put_u8(self.len);
        dst.put_slice(self.payload());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_SERIALIZED_SIZE);
        self.serialize(&mut buf);
        buf.to_vec()
    }

    /// Decode a serialized frame, reporting why it was rejected.
    pub fn try_deserialize(src: &[u8]) -> Result<Self> {
        if src.len() > MAX_SERIALIZED_SIZE {
            return Err(FrameError::SerializedTooLong {
                size: src.len(),
                max: MAX_SERIALIZED_SIZE,
            });
        }
        if src.len() < HEADER_SIZE {
            return Err(FrameError::MalformedWire(format!(
                "{} bytes is shorter than a frame header",
                src.len()
            )));
        }

        let mut buf = src;
        let id = buf.get_u32_le();
        let len = buf.get_u8() as usize;
        if len > MAX_PAYLOAD {
            return Err(FrameError::LengthOutOfRange(len));
        }
        if buf.remaining() < len {
            return Err(FrameError::MalformedWire(format!(
                "declared {len} payload bytes, found {}",
                buf.remaining()
            )));
        }

        Self::new(FrameAddress::unpack(id), &buf[..len])
    }

    /// Decode a serialized frame. Malformed input yields [`Frame::invalid`].
    pub fn deserialize(src: &[u8]) -> Self {
        Self::try_deserialize(src).unwrap_or_default()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}]",
            self.address.from,
            self.address.to,
            self.address.priority.name()
        )?;
        if self.address.is_fragment {
            f.write_str(" fragment")?;
        }
        write!(f, " ({}):", self.len)?;
        for byte in self.payload() {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Priority;
    use crate::protocol::{CHECK_IN, UID_COORDINATOR};

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let addr = FrameAddress::new(17, UID_COORDINATOR).with_priority(Priority::Medium);
        let frame = Frame::new(addr, &[CHECK_IN, 1, 2, 3]).unwrap();

        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert_eq!(&bytes[..4], &addr.pack().to_le_bytes());
        assert_eq!(bytes[4], 4);

        let decoded = Frame::deserialize(&bytes);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_max_size_frame() {
        let frame = Frame::new(FrameAddress::new(9, 10), &[0xAA; 8]).unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), MAX_SERIALIZED_SIZE);
        assert_eq!(Frame::deserialize(&bytes), frame);
    }

    #[test]
    fn test_new_rejects_long_payload() {
        let err = Frame::new(FrameAddress::new(1, 2), &[0; 9]).unwrap_err();
        assert!(matches!(err, FrameError::LengthOutOfRange(9)));
    }

    #[test]
    fn test_deserialize_too_long_is_invalid() {
        let frame = Frame::deserialize(&[0u8; 14]);
        assert!(frame.is_invalid());
        assert_eq!(frame.byte(0), INVALID);
    }

    #[test]
    fn test_deserialize_bad_length_is_invalid() {
        let mut bytes = FrameAddress::new(4, 5).pack().to_le_bytes().to_vec();
        bytes.push(9);
        bytes.extend_from_slice(&[1; 8]);
        assert!(Frame::deserialize(&bytes).is_invalid());
    }

    #[test]
    fn test_deserialize_truncated_is_invalid() {
        let mut bytes = FrameAddress::new(4, 5).pack().to_le_bytes().to_vec();
        bytes.push(6);
        bytes.extend_from_slice(&[1, 2]);
        assert!(Frame::deserialize(&bytes).is_invalid());
        assert!(Frame::deserialize(&[1, 2]).is_invalid());
    }

    #[test]
    fn test_command_byte_skips_group_id() {
        let standard = Frame::new(FrameAddress::new(2, 9), &[CHECK_IN]).unwrap();
        assert_eq!(standard.command_byte(), CHECK_IN);

        let fragment =
            Frame::new(FrameAddress::new(2, 9).with_fragment(true), &[77, CHECK_IN, 5]).unwrap();
        assert_eq!(fragment.command_byte(), CHECK_IN);
    }

    #[test]
    fn test_unused_bytes_are_zero() {
        let frame = Frame::new(FrameAddress::new(2, 9), &[1]).unwrap();
        assert_eq!(frame.byte(1), 0);
        assert_eq!(frame.byte(7), 0);
        assert_eq!(frame.byte(100), 0);
    }

    #[test]
    fn test_display() {
        let frame = Frame::new(FrameAddress::new(2, 9).with_fragment(true), &[0x10, 0x88]).unwrap();
        assert_eq!(frame.to_string(), "2 -> 9 [normal] fragment (2): 10 88");
    }
}
