use std::io::{Read, Write};

use automato_frame::{Frame, FrameError, WireReader, WireWriter};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// A bus link over a byte stream using start/stop wire framing.
///
/// The read and write halves are separate so a tty can be cloned into both,
/// and tests can plug in in-memory buffers.
pub struct SerialTransport<R, W> {
    name: String,
    reader: WireReader<R>,
    writer: WireWriter<W>,
}

impl<R: Read, W: Write> SerialTransport<R, W> {
    pub fn new(name: impl Into<String>, reader: R, writer: W) -> Self {
        let name = name.into();
        Self {
            reader: WireReader::with_label(reader, name.clone()),
            writer: WireWriter::new(writer),
            name,
        }
    }

    pub fn reader(&self) -> &WireReader<R> {
        &self.reader
    }

    pub fn writer(&self) -> &WireWriter<W> {
        &self.writer
    }
}

#[cfg(unix)]
impl SerialTransport<std::fs::File, std::fs::File> {
    /// Open a serial device in raw, non-blocking mode at `baud`.
    pub fn open(path: impl AsRef<std::path::Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = crate::tty::open(path, baud).map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = file.try_clone()?;
        debug!(?path, baud, "opened serial device");
        Ok(Self::new(path.display().to_string(), file, writer))
    }
}

impl<R: Read + Send, W: Write + Send> Transport for SerialTransport<R, W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_read_frame(&mut self) -> Result<Option<Frame>> {
        match self.reader.read_frame() {
            Ok(frame) => Ok(frame),
            Err(FrameError::ConnectionClosed) => Err(TransportError::Closed(self.name.clone())),
            Err(err) => Err(err.into()),
        }
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        debug!(link = %self.name, %frame, "write frame");
        match self.writer.write_frame(frame) {
            Ok(()) => Ok(()),
            Err(FrameError::ConnectionClosed) => Err(TransportError::Closed(self.name.clone())),
            Err(err) => Err(err.into()),
        }
    }
}
