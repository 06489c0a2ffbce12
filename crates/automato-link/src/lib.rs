//! The link layer shared by every automato node.
//!
//! Sits between the transports and the protocol dispatchers: chunks
//! outgoing payloads, tracks which frames still owe an acknowledgment,
//! acknowledges and reassembles incoming frames.

pub mod ack;
pub mod error;
pub mod link;

pub use ack::{AckBook, AckSlots, AckTracker, PendingAck, ACK_TIMEOUT_MS, MODULE_ACK_SLOTS};
pub use error::{LinkError, Result};
pub use link::{Inbound, Link};
