//! The set of bus interfaces a node is attached to.
//!
//! A node may sit on several physical links at once (two serial ports, a
//! radio and a wire). Frames read from one interface can be forwarded onto
//! another by explicit rules, which turns the node into a simple bridge.

use std::sync::{Arc, Mutex, MutexGuard};

use automato_frame::Frame;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{FrameSink, Transport};

/// A transport that can be shared with a reader thread.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Interfaces allowed on a module.
pub const MODULE_MAX_INTERFACES: usize = 2;

/// Forwarding rules allowed on a module.
pub const MODULE_MAX_RULES: usize = 2;

/// Which way a forwarding rule copies frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frames read on either side are written to the other.
    Bidirectional,
    /// Frames read on `from` are written to `to` only.
    Unidirectional,
}

/// Copy frames read on one interface onto another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardRule {
    pub from: usize,
    pub to: usize,
    pub direction: Direction,
}

impl ForwardRule {
    /// Interface that should receive a frame read on `source`, if any.
    fn target_for(&self, source: usize) -> Option<usize> {
        if self.from == source {
            Some(self.to)
        } else if self.direction == Direction::Bidirectional && self.to == source {
            Some(self.from)
        } else {
            None
        }
    }

    fn covers(&self, from: usize, to: usize) -> bool {
        (self.from == from && self.to == to)
            || (self.direction == Direction::Bidirectional && self.from == to && self.to == from)
    }
}

/// Owned collection of transports plus forwarding rules.
#[derive(Clone, Default)]
pub struct InterfaceSet {
    interfaces: Vec<SharedTransport>,
    names: Vec<String>,
    rules: Vec<ForwardRule>,
    max_interfaces: Option<usize>,
    max_rules: Option<usize>,
    cursor: usize,
}

impl std::fmt::Debug for InterfaceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceSet")
            .field("interfaces", &self.names)
            .field("rules", &self.rules)
            .finish()
    }
}

impl InterfaceSet {
    /// An unbounded set (coordinator).
    pub fn new() -> Self {
        Self::default()
    }

    /// A set with fixed limits on interfaces and forwarding rules.
    pub fn with_capacity_limit(max_interfaces: usize, max_rules: usize) -> Self {
        Self {
            max_interfaces: Some(max_interfaces),
            max_rules: Some(max_rules),
            ..Self::default()
        }
    }

    /// The limits used on embedded modules.
    pub fn for_module() -> Self {
        Self::with_capacity_limit(MODULE_MAX_INTERFACES, MODULE_MAX_RULES)
    }

    /// Attach a transport and return its index.
    pub fn add(&mut self, transport: impl Transport + 'static) -> Result<usize> {
        self.add_boxed(Box::new(transport))
    }

    pub fn add_boxed(&mut self, transport: Box<dyn Transport>) -> Result<usize> {
        if let Some(max) = self.max_interfaces {
            if self.interfaces.len() >= max {
                return Err(TransportError::CapacityReached {
                    what: "interfaces",
                    max,
                });
            }
        }
        let name = transport.name().to_string();
        debug!(interface = %name, index = self.interfaces.len(), "interface added");
        self.interfaces.push(Arc::new(Mutex::new(transport)));
        self.names.push(name);
        Ok(self.interfaces.len() - 1)
    }

    /// Add a forwarding rule between two attached interfaces.
    pub fn forward(&mut self, from: usize, to: usize, direction: Direction) -> Result<()> {
        if from == to {
            return Err(TransportError::InvalidRule(format!(
                "interface {from} cannot forward to itself"
            )));
        }
        let count = self.interfaces.len();
        if from >= count || to >= count {
            return Err(TransportError::InvalidRule(format!(
                "no interface {} (have {count})",
                from.max(to)
            )));
        }
        if self.rules.iter().any(|rule| rule.covers(from, to)) {
            return Err(TransportError::InvalidRule(format!(
                "{from} -> {to} is already forwarded"
            )));
        }
        if let Some(max) = self.max_rules {
            if self.rules.len() >= max {
                return Err(TransportError::CapacityReached {
                    what: "forwarding rules",
                    max,
                });
            }
        }
        self.rules.push(ForwardRule {
            from,
            to,
            direction,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn rules(&self) -> &[ForwardRule] {
        &self.rules
    }

    /// Name of interface `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Shared handle to interface `index`, for reader threads.
    pub fn handle(&self, index: usize) -> Option<SharedTransport> {
        self.interfaces.get(index).cloned()
    }

    /// Write a frame on one interface.
    pub fn send_on(&self, index: usize, frame: &Frame) -> Result<()> {
        let transport = self
            .interfaces
            .get(index)
            .ok_or_else(|| TransportError::Closed(format!("#{index}")))?;
        self.lock(index, transport)?.send_frame(frame)
    }

    /// Write a frame on every interface.
    ///
    /// Every interface is attempted; the first failure is returned.
    pub fn broadcast(&self, frame: &Frame) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.interfaces.len() {
            if let Err(err) = self.send_on(index, frame) {
                warn!(interface = ?self.name(index), error = %err, "send failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Read one frame from the next interface in round-robin order.
    ///
    /// Forwarding rules are applied before the frame is returned along with
    /// the index of the interface it came from.
    pub fn poll_next(&mut self) -> Result<Option<(usize, Frame)>> {
        if self.interfaces.is_empty() {
            return Ok(None);
        }
        let index = self.cursor % self.interfaces.len();
        self.cursor = (index + 1) % self.interfaces.len();

        let frame = self.lock(index, &self.interfaces[index])?.try_read_frame()?;
        match frame {
            Some(frame) => {
                self.forward_from(index, &frame)?;
                Ok(Some((index, frame)))
            }
            None => Ok(None),
        }
    }

    /// Apply forwarding rules to a frame read on `source`.
    pub fn forward_from(&self, source: usize, frame: &Frame) -> Result<()> {
        for rule in &self.rules {
            if let Some(target) = rule.target_for(source) {
                debug!(from = source, to = target, %frame, "forward frame");
                self.send_on(target, frame)?;
            }
        }
        Ok(())
    }

    fn lock<'a>(
        &self,
        index: usize,
        transport: &'a SharedTransport,
    ) -> Result<MutexGuard<'a, Box<dyn Transport>>> {
        transport.lock().map_err(|_| {
            TransportError::Poisoned(self.name(index).unwrap_or("unknown").to_string())
        })
    }
}

/// Sending through the set writes on every interface.
impl FrameSink for InterfaceSet {
    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.broadcast(frame)
    }
}
