//! A module node: registration with the coordinator, request dispatch and
//! the local part of the distributed flow executor.

use std::time::Duration;

use automato_event::{compare, Event, TaggedValue};
use automato_frame::protocol::{
    CHECK_IN, COMMAND, COMMAND_INPUT, ERROR_GENERIC, EVENT_ADD, EVENT_REMOVE, EVENT_REMOVE_ALL,
    EVENT_RUN_NEXT_PART, EVENT_SEND_STORED, FORMAT_STORAGE, NEW_UID, REPLY_COMMAND, REPLY_EVENT_SEND_STORED,
    REPLY_NEW_UID, REPLY_UPDATE_INFO, UPDATE_INFO,
};
use automato_frame::{opcode_name, Frame, GenericError, Priority, SlotReassembler, UID_BROADCAST, UID_COORDINATOR};
use automato_link::{AckSlots, Inbound, Link};
use automato_transport::InterfaceSet;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::commands::CommandRegistry;
use crate::error::{ModuleError, Result};
use crate::event_store::EventStore;
use crate::table::EventTable;

/// Link state sized for a module.
pub type ModuleLink = Link<AckSlots, SlotReassembler>;

/// Base of the temporary uid used while waiting for `REPLY_NEW_UID`.
pub const TEMPORARY_UID_BASE: u16 = 2000;

/// Temporary uids are drawn from `BASE..=BASE + SPREAD`.
pub const TEMPORARY_UID_SPREAD: u16 = 40;

/// Interval between repeated `CHECK_IN` frames.
pub const CHECK_IN_INTERVAL_MS: u64 = 1000;

/// One module on the bus.
pub struct Node<E, C> {
    interfaces: InterfaceSet,
    link: ModuleLink,
    commands: CommandRegistry,
    store: E,
    table: EventTable,
    description: String,
    clock: C,
    fixed_uid: Option<u16>,
    awaiting_uid: bool,
}

impl<E: EventStore, C: Clock> Node<E, C> {
    /// Create a node and load its stored events. `description` is the JSON
    /// self-description sent in answer to `UPDATE_INFO`.
    pub fn new(interfaces: InterfaceSet, mut store: E, clock: C, description: impl Into<String>) -> Result<Self> {
        let table = EventTable::load(&store.raw()?);
        Ok(Self {
            interfaces,
            link: Link::new(0, AckSlots::new(), SlotReassembler::new()),
            commands: CommandRegistry::new(),
            store,
            table,
            description: description.into(),
            clock,
            fixed_uid: None,
            awaiting_uid: false,
        })
    }

    /// Use `uid` instead of a stored or assigned one.
    pub fn with_uid(mut self, uid: u16) -> Self {
        self.fixed_uid = Some(uid);
        self.link.set_uid(uid);
        self
    }

    pub fn uid(&self) -> u16 {
        self.link.uid()
    }

    pub fn link(&self) -> &ModuleLink {
        &self.link
    }

    pub fn table(&self) -> &EventTable {
        &self.table
    }

    pub fn store(&self) -> &E {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut E {
        &mut self.store
    }

    pub fn interfaces_mut(&mut self) -> &mut InterfaceSet {
        &mut self.interfaces
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Register a command handler under `id`.
    pub fn register(&mut self, id: u8, handler: impl FnMut(&[u8]) -> TaggedValue + Send + 'static) -> Result<()> {
        self.commands.register(id, handler)
    }

    /// Re-read the event table from storage.
    pub fn reload(&mut self) -> Result<()> {
        let raw = self.store.raw()?;
        self.table.reload(&raw);
        Ok(())
    }

    /// Load the uid and check in with the coordinator.
    ///
    /// A node without a uid checks in under a random temporary one and asks
    /// for a permanent uid; the answer arrives later through [`Node::poll`],
    /// after which the node checks in again under its new uid. The
    /// self-description is withheld while the uid is temporary.
    /// Blocks until a frame addressed to this node arrives, or fails once
    /// `deadline` has passed.
    pub fn setup(&mut self, deadline: Option<Duration>) -> Result<u16> {
        self.reload()?;
        let uid = match self.fixed_uid {
            Some(uid) => Some(uid),
            None => self.store.load_uid()?,
        };
        match uid {
            Some(uid) => {
                self.link.set_uid(uid);
                self.check_in(deadline)?;
                info!(uid, "checked in");
            }
            None => {
                let temporary = TEMPORARY_UID_BASE + rand::thread_rng().gen_range(0..=TEMPORARY_UID_SPREAD);
                self.link.set_uid(temporary);
                self.awaiting_uid = true;
                self.check_in(deadline)?;
                info!(temporary, "checked in without a uid; requesting one");
                self.send(UID_COORDINATOR, &[NEW_UID], Priority::Critical)?;
            }
        }
        Ok(self.uid())
    }

    fn check_in(&mut self, deadline: Option<Duration>) -> Result<()> {
        let start = self.clock.now_ms();
        let limit = deadline.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let mut last_sent: Option<u64> = None;
        loop {
            let now = self.clock.now_ms();
            if last_sent.map_or(true, |sent| now.saturating_sub(sent) >= CHECK_IN_INTERVAL_MS) {
                last_sent = Some(now);
                debug!(uid = self.uid(), "check-in");
                self.send(UID_COORDINATOR, &[CHECK_IN], Priority::Medium)?;
            }
            for _ in 0..self.interfaces.len() {
                if let Some((_, frame)) = self.interfaces.poll_next()? {
                    if frame.address.is_only_for(self.uid()) {
                        self.handle_frame(&frame)?;
                        return Ok(());
                    }
                }
            }
            let waited_ms = now.saturating_sub(start);
            if limit.is_some_and(|limit| waited_ms >= limit) {
                return Err(ModuleError::CheckInTimeout { waited_ms });
            }
            self.clock.sleep(Duration::from_millis(1));
        }
    }

    /// One pass of the main loop: evaluate Main events, handle at most one
    /// inbound frame and report dropped acknowledgments.
    pub fn poll(&mut self) -> Result<()> {
        self.check_main_events()?;
        if let Some((_, frame)) = self.interfaces.poll_next()? {
            self.handle_frame(&frame)?;
        }
        let now = self.clock.now_ms();
        for dropped in self.link.sweep(now) {
            warn!(to = dropped.uid, command = %opcode_name(dropped.command), "acknowledgment timed out");
            self.link
                .send_error(&mut self.interfaces, dropped.uid, GenericError::FailedToReadMessage)?;
        }
        Ok(())
    }

    /// Run the link layer on one frame and dispatch a completed payload.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<()> {
        match self.link.receive(&mut self.interfaces, frame)? {
            Inbound::Payload { from, bytes } => self.dispatch(from, &bytes),
            _ => Ok(()),
        }
    }

    fn send(&mut self, to: u16, payload: &[u8], priority: Priority) -> Result<()> {
        let now = self.clock.now_ms();
        self.link.send(&mut self.interfaces, to, payload, priority, now)?;
        Ok(())
    }

    fn send_error(&mut self, to: u16, code: GenericError) -> Result<()> {
        self.link.send_error(&mut self.interfaces, to, code)?;
        Ok(())
    }

    /// Act on one complete payload from `from`.
    pub fn dispatch(&mut self, from: u16, payload: &[u8]) -> Result<()> {
        let Some(&opcode) = payload.first() else {
            return Ok(());
        };
        debug!(from, opcode = %opcode_name(opcode), len = payload.len(), "dispatch");
        match opcode {
            REPLY_NEW_UID => match payload {
                [_, hi, lo, ..] => {
                    let uid = u16::from_be_bytes([*hi, *lo]);
                    self.store.store_uid(uid)?;
                    self.link.set_uid(uid);
                    self.awaiting_uid = false;
                    info!(uid, "assigned uid");
                    self.send(UID_COORDINATOR, &[CHECK_IN], Priority::Medium)
                }
                _ => self.send_error(from, GenericError::IncompleteArguments),
            },
            COMMAND | COMMAND_INPUT => match payload.get(1) {
                Some(&id) => self.run_external(from, id, &payload[2..]),
                None => self.send_error(from, GenericError::IncompleteArguments),
            },
            UPDATE_INFO if self.awaiting_uid => {
                debug!("withholding self-description until a uid is assigned");
                Ok(())
            }
            UPDATE_INFO => {
                let mut reply = Vec::with_capacity(self.description.len() + 1);
                reply.push(REPLY_UPDATE_INFO);
                reply.extend_from_slice(self.description.as_bytes());
                self.send(UID_COORDINATOR, &reply, Priority::Medium)
            }
            EVENT_ADD => self.edit_events(from, |store| store.store_event(&payload[1..])),
            EVENT_REMOVE => self.edit_events(from, |store| {
                if !store.remove_event(&payload[1..])? {
                    debug!("event to remove is not stored");
                }
                Ok(())
            }),
            EVENT_REMOVE_ALL => self.edit_events(from, |store| store.remove_all()),
            FORMAT_STORAGE => {
                self.edit_events(from, |store| store.format())?;
                warn!("storage formatted");
                Ok(())
            }
            EVENT_RUN_NEXT_PART => match payload {
                [_, flow_id, section, ..] => self.advance(*flow_id, *section),
                _ => self.send_error(from, GenericError::IncompleteArguments),
            },
            EVENT_SEND_STORED => {
                let mut reply = vec![REPLY_EVENT_SEND_STORED];
                reply.extend_from_slice(&self.store.raw()?);
                self.send(from, &reply, Priority::Normal)
            }
            ERROR_GENERIC => {
                let code = payload.get(1).copied().unwrap_or_default();
                match GenericError::from_code(code) {
                    Some(error) => warn!(from, %error, "peer reported an error"),
                    None => warn!(from, code, "peer reported an unknown error"),
                }
                Ok(())
            }
            other => {
                debug!(from, opcode = other, "unsupported opcode");
                self.send_error(from, GenericError::ProtocolNotSupported)
            }
        }
    }

    fn edit_events(&mut self, from: u16, edit: impl FnOnce(&mut E) -> Result<()>) -> Result<()> {
        match edit(&mut self.store) {
            Ok(()) => self.reload(),
            Err(ModuleError::InvalidEvent(blob)) => {
                warn!(from, ?blob, "refusing unusable event");
                self.send_error(from, GenericError::InvalidArguments)
            }
            Err(err) => Err(err),
        }
    }

    fn run_external(&mut self, from: u16, id: u8, input: &[u8]) -> Result<()> {
        let Some(value) = self.commands.run(id, input) else {
            warn!(from, id, "command not found");
            return self.send_error(from, GenericError::CommandNotFound);
        };
        let mut reply = vec![REPLY_COMMAND, id];
        if value.is_set() {
            reply.push(value.to_wire_tag());
            value.encode(&mut reply);
        }
        self.send(from, &reply, Priority::Normal)
    }

    /// Evaluate every Main event whose interval has elapsed and start the
    /// flows whose condition holds.
    pub fn check_main_events(&mut self) -> Result<()> {
        let now = self.clock.now_ms();
        for index in 0..self.table.mains().len() {
            let slot = self.table.mains()[index];
            if now.saturating_sub(slot.last_run) < slot.event.interval_ms() {
                continue;
            }
            if let Some(slot) = self.table.main_mut(index) {
                slot.last_run = now;
            }
            let main = slot.event;
            let output = self.run_local(main.function_id);
            if !compare(main.conditional, &output, &main.compare_to) {
                continue;
            }
            debug!(flow = main.flow_id, %output, "main event matched");
            if self.table.has_child(main.flow_id, 1) {
                self.advance(main.flow_id, 1)?;
            } else {
                self.announce(main.flow_id, 1)?;
            }
        }
        Ok(())
    }

    /// Run `section` of `flow_id` and every following section stored here,
    /// then announce the first section that lives elsewhere.
    pub fn advance(&mut self, flow_id: u8, section: u8) -> Result<()> {
        let mut current = section;
        let mut steps = 0;
        loop {
            let Some(event) = self.table.child(flow_id, current).copied() else {
                debug!(flow = flow_id, section = current, "section not stored here");
                return Ok(());
            };
            let next = self.run_step(&event);
            steps += 1;
            if next == 0 {
                debug!(flow = flow_id, "flow finished");
                return Ok(());
            }
            if !self.table.has_child(flow_id, next) {
                return self.announce(flow_id, next);
            }
            // More local steps than stored children means the chain loops.
            if steps >= self.table.children().len() {
                warn!(flow = flow_id, section = next, "local section chain loops; handing off to the bus");
                return self.announce(flow_id, next);
            }
            current = next;
        }
    }

    fn run_step(&mut self, event: &Event) -> u8 {
        match event {
            Event::Command(step) => {
                self.run_local(step.function_id);
                step.next_section
            }
            Event::If(branch) => {
                let output = self.run_local(branch.function_id);
                if compare(branch.conditional, &output, &branch.compare_to) {
                    branch.if_true
                } else {
                    branch.if_false
                }
            }
            Event::Main(_) => 0,
        }
    }

    fn run_local(&mut self, function_id: u8) -> TaggedValue {
        self.commands.run(function_id, &[]).unwrap_or_else(|| {
            warn!(function_id, "flow refers to a command this module does not have");
            TaggedValue::Unset
        })
    }

    fn announce(&mut self, flow_id: u8, section: u8) -> Result<()> {
        debug!(flow = flow_id, section, "announce next part");
        self.send(UID_BROADCAST, &[EVENT_RUN_NEXT_PART, flow_id, section], Priority::Normal)
    }
}

impl<E, C> std::fmt::Debug for Node<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("uid", &self.link.uid())
            .field("interfaces", &self.interfaces)
            .field("commands", &self.commands)
            .field("mains", &self.table.mains().len())
            .field("children", &self.table.children().len())
            .finish()
    }
}
