//! An in-process shared bus.
//!
//! Every frame sent by one port is delivered to every other port attached to
//! the same bus, like a shared CAN medium. Used by tests and the simulator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use automato_frame::Frame;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

#[derive(Debug, Default)]
struct BusState {
    inboxes: Vec<VecDeque<Frame>>,
    traffic: Vec<(String, Frame)>,
    record: bool,
}

/// A shared in-memory medium.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus that keeps a copy of every frame for [`MemoryBus::take_traffic`].
    pub fn recording() -> Self {
        let bus = Self::new();
        if let Ok(mut state) = bus.state.lock() {
            state.record = true;
        }
        bus
    }

    /// Attach a new port to the bus.
    pub fn attach(&self, name: impl Into<String>) -> MemoryPort {
        let mut state = lock(&self.state);
        state.inboxes.push(VecDeque::new());
        MemoryPort {
            name: name.into(),
            index: state.inboxes.len() - 1,
            state: Arc::clone(&self.state),
        }
    }

    /// Drain the recorded `(sender, frame)` pairs.
    pub fn take_traffic(&self) -> Vec<(String, Frame)> {
        std::mem::take(&mut lock(&self.state).traffic)
    }

    /// Number of frames waiting across all ports.
    pub fn pending(&self) -> usize {
        lock(&self.state).inboxes.iter().map(VecDeque::len).sum()
    }
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One node's connection to a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryPort {
    name: String,
    index: usize,
    state: Arc<Mutex<BusState>>,
}

impl MemoryPort {
    /// Inject a frame into this port's inbox as if another node had sent it.
    pub fn inject(&self, frame: Frame) {
        lock(&self.state).inboxes[self.index].push_back(frame);
    }
}

impl Transport for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(lock(&self.state).inboxes[self.index].pop_front())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_invalid() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "refusing to send an invalid frame",
            )));
        }
        let mut state = lock(&self.state);
        for (index, inbox) in state.inboxes.iter_mut().enumerate() {
            if index != self.index {
                inbox.push_back(*frame);
            }
        }
        if state.record {
            state.traffic.push((self.name.clone(), *frame));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use automato_frame::FrameAddress;

    use super::*;

    fn frame(byte: u8) -> Frame {
        Frame::new(FrameAddress::new(2, 9), &[byte]).unwrap()
    }

    #[test]
    fn frames_reach_every_other_port() {
        let bus = MemoryBus::new();
        let mut a = bus.attach("a");
        let mut b = bus.attach("b");
        let mut c = bus.attach("c");

        a.send_frame(&frame(1)).unwrap();

        assert_eq!(a.try_read_frame().unwrap(), None);
        assert_eq!(b.try_read_frame().unwrap(), Some(frame(1)));
        assert_eq!(c.try_read_frame().unwrap(), Some(frame(1)));
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn delivery_is_fifo() {
        let bus = MemoryBus::new();
        let mut a = bus.attach("a");
        let mut b = bus.attach("b");

        for i in 0..5 {
            a.send_frame(&frame(i)).unwrap();
        }
        for i in 0..5 {
            assert_eq!(b.try_read_frame().unwrap(), Some(frame(i)));
        }
    }

    #[test]
    fn recording_bus_keeps_traffic() {
        let bus = MemoryBus::recording();
        let mut a = bus.attach("a");
        let _b = bus.attach("b");

        a.send_frame(&frame(7)).unwrap();
        let traffic = bus.take_traffic();
        assert_eq!(traffic, vec![("a".to_string(), frame(7))]);
        assert!(bus.take_traffic().is_empty());
    }

    #[test]
    fn invalid_frames_are_rejected() {
        let bus = MemoryBus::new();
        let mut a = bus.attach("a");
        assert!(a.send_frame(&Frame::invalid()).is_err());
    }
}
