//! The automato coordinator.
//!
//! Keeps the module registry, turns the parsed flow graph into per-module
//! event updates, answers module protocol requests and relays command
//! requests from local socket clients to the bus.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flows;
pub mod runtime;
pub mod schema;
pub mod socket;
pub mod store;
pub mod sync;

pub use config::{CoordinatorConfig, FLOWS_FILE_NAME};
pub use dispatcher::{format_primitive, DescriptionReport, Dispatcher, InfoStatus, REQUEST_TIMEOUT_MS};
pub use error::{CoordinatorError, FlowError, Result, SchemaError, StoreError, SyncError};
pub use flows::{
    CandidateEvent, CandidateFlow, FlowDefinition, FlowEntry, FlowResolver, FlowSource,
    JsonFlowFile, Literal,
};
pub use runtime::{Coordinator, MonotonicClock, Shutdown};
pub use schema::{CommandDescription, DescriptionValidator, SelfDescription};
pub use socket::{
    ClientHandle, OutputType, ReplySink, SocketBridge, SocketClient, SocketReply, SocketRequest,
};
pub use store::{CommandRecord, FlowEventRow, FlowRecord, MemoryStore, ModuleRecord, ModuleRole, Store};
pub use sync::{synchronize, EventUpdate, SyncOutcome, UpdateKind};
