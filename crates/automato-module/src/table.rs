//! The decoded, in-memory view of a module's stored events.

use automato_event::{scan_stream, Event, MainEvent};
use tracing::{debug, warn};

pub const MODULE_MAIN_EVENTS: usize = 3;
pub const MODULE_CHILD_EVENTS: usize = 8;

/// A Main event and when it last ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainSlot {
    pub event: MainEvent,
    pub last_run: u64,
}

/// Main and child events loaded from a packed stream, up to fixed capacities.
#[derive(Debug, Clone, Default)]
pub struct EventTable<const MAIN: usize = MODULE_MAIN_EVENTS, const CHILD: usize = MODULE_CHILD_EVENTS> {
    mains: Vec<MainSlot>,
    children: Vec<Event>,
}

impl<const MAIN: usize, const CHILD: usize> EventTable<MAIN, CHILD> {
    pub fn new() -> Self {
        Self {
            mains: Vec::with_capacity(MAIN),
            children: Vec::with_capacity(CHILD),
        }
    }

    /// Decode `stream`, skipping empty slots. Events beyond capacity and a
    /// truncated tail are dropped.
    pub fn load(stream: &[u8]) -> Self {
        let mut table = Self::new();
        let mut scan = scan_stream(stream);
        for blob in scan.by_ref() {
            let event = match Event::deserialize(blob) {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "skipping undecodable stored event");
                    continue;
                }
            };
            match event {
                Event::Main(main) if table.mains.len() < MAIN => table.mains.push(MainSlot {
                    event: main,
                    last_run: 0,
                }),
                Event::Main(_) => warn!(%event, max = MAIN, "main event table full; ignoring"),
                _ if table.children.len() < CHILD => table.children.push(event),
                _ => warn!(%event, max = CHILD, "child event table full; ignoring"),
            }
        }
        if scan.remaining() > 0 {
            debug!(bytes = scan.remaining(), "ignoring unreadable tail of event stream");
        }
        table
    }

    /// Replace the contents with `stream`, keeping the last run time of Main
    /// events that are still present.
    pub fn reload(&mut self, stream: &[u8]) {
        let mut fresh = Self::load(stream);
        for slot in &mut fresh.mains {
            if let Some(old) = self.mains.iter().find(|old| old.event == slot.event) {
                slot.last_run = old.last_run;
            }
        }
        *self = fresh;
        debug!(mains = self.mains.len(), children = self.children.len(), "event table loaded");
    }

    pub fn mains(&self) -> &[MainSlot] {
        &self.mains
    }

    pub fn main_mut(&mut self, index: usize) -> Option<&mut MainSlot> {
        self.mains.get_mut(index)
    }

    pub fn children(&self) -> &[Event] {
        &self.children
    }

    /// The child event for `(flow_id, section)` stored on this module.
    pub fn child(&self, flow_id: u8, section: u8) -> Option<&Event> {
        self.children
            .iter()
            .find(|event| event.flow_id() == flow_id && event.section() == section)
    }

    pub fn has_child(&self, flow_id: u8, section: u8) -> bool {
        self.child(flow_id, section).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.mains.is_empty() && self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use automato_event::{CommandEvent, Conditional, IfEvent, IntervalUnit, TaggedValue};

    use super::*;

    fn main(flow_id: u8) -> Event {
        Event::Main(MainEvent {
            flow_id,
            function_id: 1,
            interval_unit: IntervalUnit::Seconds,
            interval: 1,
            conditional: Conditional::Gt,
            compare_to: TaggedValue::I16(20),
        })
    }

    fn step(flow_id: u8, section: u8) -> Event {
        Event::Command(CommandEvent {
            flow_id,
            function_id: 2,
            section,
            next_section: 0,
        })
    }

    fn pack(events: &[Event]) -> Vec<u8> {
        let mut stream = Vec::new();
        for event in events {
            event.serialize(&mut stream);
        }
        stream
    }

    #[test]
    fn loads_and_looks_up_children() {
        let branch = Event::If(IfEvent {
            flow_id: 4,
            function_id: 3,
            section: 2,
            if_true: 3,
            if_false: 0,
            conditional: Conditional::Eq,
            compare_to: TaggedValue::Bool(true),
        });
        let mut stream = pack(&[main(4), step(4, 1)]);
        stream.extend_from_slice(&[0, 0, 0]);
        branch.serialize(&mut stream);

        let table: EventTable = EventTable::load(&stream);
        assert_eq!(table.mains().len(), 1);
        assert_eq!(table.children().len(), 2);
        assert_eq!(table.child(4, 2), Some(&branch));
        assert!(table.has_child(4, 1));
        assert!(!table.has_child(4, 3));
        assert!(!table.has_child(5, 1));
    }

    #[test]
    fn capacity_limits_are_enforced() {
        let stream = pack(&[main(1), main(2), main(3), step(1, 1), step(1, 2), step(1, 3)]);
        let table = EventTable::<2, 2>::load(&stream);
        assert_eq!(table.mains().len(), 2);
        assert_eq!(table.children().len(), 2);
        assert!(!table.has_child(1, 3));
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let mut stream = pack(&[step(1, 1)]);
        stream.extend_from_slice(&step(1, 2).to_bytes()[..3]);
        let table: EventTable = EventTable::load(&stream);
        assert_eq!(table.children().len(), 1);
    }

    #[test]
    fn reload_keeps_last_run_of_surviving_mains() {
        let mut table: EventTable = EventTable::load(&pack(&[main(1), main(2)]));
        table.main_mut(0).unwrap().last_run = 500;
        table.main_mut(1).unwrap().last_run = 700;

        table.reload(&pack(&[main(2), main(3)]));
        assert_eq!(table.mains()[0].last_run, 700);
        assert_eq!(table.mains()[1].last_run, 0);
    }
}
