use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::codec::Frame;
use crate::error::{FrameError, Result};
use crate::wire::{WireDecoder, WireEvent};

const READ_CHUNK_SIZE: usize = 256;

/// Reads frames from any `Read` stream carrying the start/stop wire format.
///
/// Handles partial reads and interleaved diagnostic text internally. A stream
/// that reports `WouldBlock` yields `Ok(None)` instead of blocking.
pub struct WireReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: WireDecoder,
    label: String,
}

impl<T: Read> WireReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_label(inner, "wire")
    }

    /// Create a reader whose log lines carry `label`.
    pub fn with_label(inner: T, label: impl Into<String>) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            decoder: WireDecoder::new(),
            label: label.into(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when a non-blocking stream has no complete frame yet
    /// and `Err(FrameError::ConnectionClosed)` at EOF.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            while self.buf.has_remaining() {
                let byte = self.buf.get_u8();
                let event = self.decoder.push(byte);
                if let Some(frame) = self.handle(event) {
                    return Ok(Some(frame));
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                let pending = self.decoder.flush_text();
                self.handle(pending);
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn handle(&self, event: Option<WireEvent>) -> Option<Frame> {
        match event? {
            WireEvent::Frame(frame) => {
                debug!(link = %self.label, %frame, "read frame");
                Some(frame)
            }
            WireEvent::Text(line) => {
                debug!(link = %self.label, "{line}");
                None
            }
            WireEvent::Dropped(reason) => {
                warn!(link = %self.label, %reason, "dropped partial frame");
                None
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::id::FrameAddress;
    use crate::wire::encode_wire;

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() {
                return Err(std::io::Error::new(ErrorKind::WouldBlock, "drained"));
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    fn frame(payload: &[u8]) -> Frame {
        Frame::new(FrameAddress::new(12, 2), payload).unwrap()
    }

    #[test]
    fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_wire(&frame(&[1]), &mut wire);
        wire.put_slice(b"debug output\n");
        encode_wire(&frame(&[2, 3]), &mut wire);

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Some(frame(&[1])));
        assert_eq!(reader.read_frame().unwrap(), Some(frame(&[2, 3])));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_reads_then_would_block() {
        let mut wire = BytesMut::new();
        encode_wire(&frame(&[9, 9, 9]), &mut wire);

        let mut reader = WireReader::new(ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        });

        assert_eq!(reader.read_frame().unwrap(), Some(frame(&[9, 9, 9])));
        assert_eq!(reader.read_frame().unwrap(), None);
    }
}
