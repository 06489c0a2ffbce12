//! CAN-style bus messaging and distributed event flows.
//!
//! A coordinator keeps a registry of modules and a set of flows; each flow is
//! split into events that are stored on the modules that run them. Modules
//! trigger flows from polled Main events and hand control to each other with
//! broadcast `EVENT_RUN_NEXT_PART` frames.
//!
//! # Crate Structure
//!
//! - [`frame`]: 8-byte frames, 32-bit addressing, fragmentation, wire codec
//! - [`transport`]: serial and in-memory links, interface sets with forwarding
//! - [`event`]: tagged values and the Main / If / Command event codec
//! - [`link`]: acknowledgment tracking and the shared send/receive path
//! - [`coordinator`]: registry, flow synchronization, socket bridge (behind `coordinator`)
//! - [`module`]: command registry, event storage, flow executor (behind `module`)

/// Re-export frame types.
pub mod frame {
    pub use automato_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use automato_transport::*;
}

/// Re-export event types.
pub mod event {
    pub use automato_event::*;
}

/// Re-export link types.
pub mod link {
    pub use automato_link::*;
}

/// Re-export coordinator types (requires `coordinator` feature).
#[cfg(feature = "coordinator")]
pub mod coordinator {
    pub use automato_coordinator::*;
}

/// Re-export module types (requires `module` feature).
#[cfg(feature = "module")]
pub mod module {
    pub use automato_module::*;
}
