//! Bus transports for automato.
//!
//! Everything above this crate talks to the bus through the [`Transport`]
//! trait: a non-blocking frame poll plus a frame write. Provided here:
//! - [`SerialTransport`]: start/stop framed frames over a byte stream (tty)
//! - [`MemoryBus`]: a shared in-process medium for tests and simulation
//! - [`InterfaceSet`]: several transports with forwarding rules between them
//!
//! The coordinator's local request socket lives here as well since it shares
//! the socket hygiene (stale file removal, cleanup on drop).

pub mod error;
pub mod interfaces;
pub mod memory;
pub mod serial;
pub mod traits;

#[cfg(unix)]
pub mod tty;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use interfaces::{Direction, ForwardRule, InterfaceSet, SharedTransport};
pub use memory::{MemoryBus, MemoryPort};
pub use serial::SerialTransport;
pub use traits::{FrameSink, Transport};

#[cfg(unix)]
pub use uds::SocketListener;
