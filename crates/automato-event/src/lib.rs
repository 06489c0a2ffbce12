//! Flow events and tagged values for automato.
//!
//! Flows are stored on modules as packed event blobs; commands return
//! [`TaggedValue`]s that Main and If events compare against. Both encodings
//! must match byte for byte between the coordinator and every module.

pub mod conditional;
pub mod error;
pub mod event;
pub mod interval;
pub mod value;

pub use conditional::Conditional;
pub use error::{EventError, Result};
pub use event::{
    peek_serialized_length, scan_stream, CommandEvent, Event, EventKind, IfEvent, MainEvent,
    StreamScan,
};
pub use interval::{interval_ms, IntervalUnit};
pub use value::{compare, TaggedValue, ValueType};
