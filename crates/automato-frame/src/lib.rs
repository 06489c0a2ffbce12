//! Addressed bus frames for automato.
//!
//! Every frame on the bus is a 32-bit identifier (priority, fragment flag,
//! 11-bit sender, 11-bit receiver) plus at most 8 payload bytes. This crate
//! covers:
//! - packing and unpacking the identifier
//! - serializing frames to the 5..13 byte transport form
//! - splitting long payloads into fragment groups and reassembling them
//! - start/stop framing for byte-stream links
//!
//! The reserved protocol bytes shared by every node live in [`protocol`].

pub mod codec;
pub mod error;
pub mod fragment;
pub mod id;
pub mod protocol;
pub mod reader;
pub mod wire;
pub mod writer;

pub use codec::{Frame, HEADER_SIZE, MAX_PAYLOAD, MAX_SERIALIZED_SIZE};
pub use error::{FrameError, Result};
pub use fragment::{
    chunk_payload, new_group_id, FragmentStore, GroupReassembler, SlotReassembler, FRAGMENT_CHUNK,
};
pub use id::{FrameAddress, Priority};
pub use protocol::{
    opcode_name, primitive_size, GenericError, UID_BROADCAST, UID_COORDINATOR, UID_SERVICE,
};
pub use reader::WireReader;
pub use wire::{encode_wire, WireDecoder, WireEvent};
pub use writer::WireWriter;
