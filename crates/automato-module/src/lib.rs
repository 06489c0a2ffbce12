//! The module side of automato.
//!
//! A [`Node`] registers with the coordinator, answers command requests,
//! keeps the events the coordinator assigns it and runs its part of every
//! flow: Main events are polled on their interval, consecutive local
//! sections run in place and the first section stored elsewhere is
//! announced on the bus with `EVENT_RUN_NEXT_PART`.

pub mod clock;
pub mod commands;
pub mod error;
pub mod event_store;
pub mod info;
pub mod node;
pub mod table;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{CommandRegistry, Handler, MODULE_COMMANDS};
pub use error::{ModuleError, Result};
pub use event_store::{EventStore, FileEventStore, MemoryEventStore, EVENTS_FILE_NAME, UID_FILE_NAME};
pub use info::{CommandInfo, ModuleInfo, Role};
pub use node::{ModuleLink, Node, CHECK_IN_INTERVAL_MS, TEMPORARY_UID_BASE, TEMPORARY_UID_SPREAD};
pub use table::{EventTable, MainSlot, MODULE_CHILD_EVENTS, MODULE_MAIN_EVENTS};
