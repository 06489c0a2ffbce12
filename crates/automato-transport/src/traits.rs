use automato_frame::Frame;

use crate::error::Result;

/// One physical or simulated link to the bus.
///
/// Reads never block: a link with nothing to deliver returns `Ok(None)`.
pub trait Transport: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Poll for the next complete frame.
    fn try_read_frame(&mut self) -> Result<Option<Frame>>;

    /// Put one frame on the link.
    fn send_frame(&mut self, frame: &Frame) -> Result<()>;
}

/// Destination for outbound frames.
///
/// The link layer writes through this trait so it does not care whether a
/// frame goes to one transport, every interface, or a test recorder.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &Frame) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).send_frame(frame)
    }
}

/// Records frames instead of sending them.
impl FrameSink for Vec<Frame> {
    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.push(*frame);
        Ok(())
    }
}
