//! Coordinator side of the protocol: reacts to module payloads, answers
//! socket requests and pushes flow updates.

use std::collections::{HashSet, VecDeque};

use automato_event::scan_stream;
use automato_event::Event;
use automato_frame::protocol::{
    self, primitive, CHECK_IN, COMMAND, ERROR_GENERIC, EVENT_ADD, EVENT_REMOVE,
    FIRST_MODULE_UID, INVALID, NEW_UID, REPLY_COMMAND, REPLY_EVENT_SEND_STORED, REPLY_NEW_UID,
    REPLY_UPDATE_INFO, UID_COORDINATOR, UID_SERVICE, UPDATE_INFO,
};
use automato_frame::{Frame, GenericError, GroupReassembler, Priority};
use automato_link::{AckTracker, Inbound, Link, PendingAck};
use automato_transport::FrameSink;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::flows::{FlowDefinition, FlowResolver};
use crate::schema::{DescriptionValidator, SelfDescription};
use crate::socket::{OutputType, ReplySink, SocketReply, SocketRequest};
use crate::store::{CommandRecord, ModuleRecord, Store};
use crate::sync::{self, EventUpdate, SyncOutcome, UpdateKind};

/// Permanent uids are handed out below the temporary id range modules use
/// while they wait for one.
const UID_POOL_END: u16 = 2005;

const RANDOM_UID_ATTEMPTS: usize = 32;

/// A socket request whose module has not replied after this long is answered
/// with an error.
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

/// How a self-description compared with what was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoStatus {
    NotStored,
    Modified,
    NotModified,
}

/// Result of registering one module self-description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptionReport {
    pub module: InfoStatus,
    pub commands: Vec<(u8, InfoStatus)>,
}

struct PendingRequest {
    module_uid: u16,
    command_id: u8,
    sent_at: u64,
    request: SocketRequest,
    reply: Box<dyn ReplySink>,
}

impl PendingRequest {
    fn fail(mut self, reason: &str) {
        warn!(
            module = self.module_uid,
            command = self.command_id,
            reason,
            "abandoning socket request"
        );
        if let Err(err) = self.reply.reply(&SocketReply::failed(&self.request, reason)) {
            warn!(module = self.module_uid, error = %err, "failed to answer socket client");
        }
    }
}

/// The single writer of coordinator state.
pub struct Dispatcher<S> {
    store: S,
    link: Link<AckTracker, GroupReassembler>,
    pending: VecDeque<PendingRequest>,
    reserved: HashSet<u16>,
    validator: DescriptionValidator,
}

impl<S: Store> Dispatcher<S> {
    pub fn new(store: S) -> Result<Self> {
        Ok(Self {
            store,
            link: Link::new(UID_COORDINATOR, AckTracker::new(), GroupReassembler::new()),
            pending: VecDeque::new(),
            reserved: HashSet::new(),
            validator: DescriptionValidator::new()?,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn link(&self) -> &Link<AckTracker, GroupReassembler> {
        &self.link
    }

    /// Socket requests still waiting for a module reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Run one inbound frame through the link and dispatch any payload it
    /// completes.
    pub fn handle_frame<K: FrameSink + ?Sized>(
        &mut self,
        sink: &mut K,
        frame: &Frame,
        now: u64,
    ) -> Result<()> {
        debug!(%frame, "recv");
        match self.link.receive(sink, frame)? {
            Inbound::Payload { from, bytes } => self.dispatch(sink, from, &bytes, now),
            Inbound::Rejected(code) => {
                debug!(from = frame.address.from, %code, "fragment rejected");
                Ok(())
            }
            Inbound::Ignored | Inbound::Acknowledged { .. } | Inbound::Pending => Ok(()),
        }
    }

    /// Act on one complete payload from `from`.
    pub fn dispatch<K: FrameSink + ?Sized>(
        &mut self,
        sink: &mut K,
        from: u16,
        payload: &[u8],
        now: u64,
    ) -> Result<()> {
        let Some(&opcode) = payload.first() else {
            return Ok(());
        };
        debug!(from, opcode = protocol::opcode_name(opcode), len = payload.len(), "dispatch");

        match opcode {
            CHECK_IN => self.on_check_in(sink, from, now)?,
            NEW_UID => self.on_new_uid(sink, from, now)?,
            REPLY_UPDATE_INFO => self.on_update_info(from, &payload[1..]),
            REPLY_COMMAND => self.on_reply_command(from, &payload[1..]),
            REPLY_EVENT_SEND_STORED => log_stored_events(from, &payload[1..]),
            ERROR_GENERIC => {
                let code = payload.get(1).copied().unwrap_or_default();
                match GenericError::from_code(code) {
                    Some(error) => warn!(from, error = %error, "module reported an error"),
                    None => warn!(from, code, "module reported an unknown error code"),
                }
            }
            INVALID => warn!(from, "received an invalid frame marker"),
            other => {
                warn!(from, opcode = other, name = protocol::opcode_name(other), "unhandled opcode");
                self.link
                    .send_error(sink, from, GenericError::ProtocolNotSupported)?;
            }
        }

        self.store.flush()?;
        Ok(())
    }

    fn on_check_in<K: FrameSink + ?Sized>(&mut self, sink: &mut K, from: u16, now: u64) -> Result<()> {
        if self.store.set_module_online(from, true)? {
            info!(uid = from, "module online");
        } else {
            info!(uid = from, "unknown module checked in");
        }
        self.link.send(sink, from, &[UPDATE_INFO], Priority::Normal, now)?;
        Ok(())
    }

    fn on_new_uid<K: FrameSink + ?Sized>(&mut self, sink: &mut K, from: u16, now: u64) -> Result<()> {
        match self.allocate_uid()? {
            Some(uid) => {
                info!(temporary = from, uid, "assigned uid");
                let [hi, lo] = uid.to_be_bytes();
                self.link
                    .send(sink, from, &[REPLY_NEW_UID, hi, lo], Priority::Important, now)?;
            }
            None => {
                warn!(temporary = from, "no free uid");
                self.link.send_error(sink, from, GenericError::Busy)?;
            }
        }
        Ok(())
    }

    fn is_free(&self, uid: u16) -> Result<bool> {
        Ok(!self.reserved.contains(&uid) && !self.store.uid_exists(uid)?)
    }

    fn allocate_uid(&mut self) -> Result<Option<u16>> {
        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_UID_ATTEMPTS {
            let uid = rng.gen_range(FIRST_MODULE_UID..UID_POOL_END);
            if self.is_free(uid)? {
                self.reserved.insert(uid);
                return Ok(Some(uid));
            }
        }
        for uid in FIRST_MODULE_UID..UID_POOL_END {
            if self.is_free(uid)? {
                self.reserved.insert(uid);
                return Ok(Some(uid));
            }
        }
        Ok(None)
    }

    fn on_update_info(&mut self, from: u16, json: &[u8]) {
        let description = match self.validator.parse(from, json) {
            Ok(description) => description,
            Err(err) => {
                warn!(from, error = %err, "discarding self-description");
                return;
            }
        };
        match self.register_description(from, &description) {
            Ok(report) => info!(
                uid = from,
                name = %description.name,
                module = ?report.module,
                commands = report.commands.len(),
                "module info processed"
            ),
            Err(err) => warn!(from, error = %err, "failed to store self-description"),
        }
    }

    /// Store or refresh what module `uid` says about itself.
    pub fn register_description(
        &mut self,
        uid: u16,
        description: &SelfDescription,
    ) -> Result<DescriptionReport> {
        let module = match self.store.module(uid)? {
            None => {
                self.store.insert_module(ModuleRecord {
                    uid,
                    name: description.name.clone(),
                    description: description.description.clone(),
                    role: description.role,
                    online: true,
                })?;
                self.reserved.remove(&uid);
                InfoStatus::NotStored
            }
            Some(stored)
                if stored.name == description.name
                    && stored.description == description.description
                    && stored.role == description.role =>
            {
                InfoStatus::NotModified
            }
            Some(stored) => {
                self.store.update_module(ModuleRecord {
                    name: description.name.clone(),
                    description: description.description.clone(),
                    role: description.role,
                    ..stored
                })?;
                InfoStatus::Modified
            }
        };

        let mut commands = Vec::with_capacity(description.commands.len());
        for command in &description.commands {
            let record = CommandRecord {
                module_uid: uid,
                command_id: command.id,
                name: command.name.clone(),
                return_format: command.return_format.clone(),
            };
            let status = match self.store.command(uid, command.id)? {
                None => {
                    self.store.insert_command(record)?;
                    InfoStatus::NotStored
                }
                Some(stored) if stored == record => InfoStatus::NotModified,
                Some(_) => {
                    self.store.update_command(record)?;
                    InfoStatus::Modified
                }
            };
            debug!(uid, command = command.id, status = ?status, "command info");
            commands.push((command.id, status));
        }

        Ok(DescriptionReport { module, commands })
    }

    fn on_reply_command(&mut self, from: u16, body: &[u8]) {
        let Some(&command_id) = body.first() else {
            warn!(from, "empty command reply");
            return;
        };
        let Some(index) = self
            .pending
            .iter()
            .position(|p| p.module_uid == from && p.command_id == command_id)
        else {
            debug!(from, command_id, "command reply without a pending request");
            return;
        };
        let Some(mut pending) = self.pending.remove(index) else {
            return;
        };

        let reply = match body.get(1) {
            None => SocketReply::empty(&pending.request),
            Some(&tag) => match format_primitive(tag, &body[2..]) {
                Some((output, output_type)) => SocketReply::new(&pending.request, output, output_type),
                None => {
                    warn!(from, command_id, tag, "malformed command reply value");
                    SocketReply::failed(&pending.request, "malformed reply value")
                }
            },
        };
        if let Err(err) = pending.reply.reply(&reply) {
            warn!(from, command_id, error = %err, "failed to answer socket client");
        }
    }

    /// Ask a module to run a command on behalf of a socket client.
    pub fn submit_request<K: FrameSink + ?Sized>(
        &mut self,
        sink: &mut K,
        request: SocketRequest,
        mut reply: Box<dyn ReplySink>,
        now: u64,
    ) -> Result<()> {
        let Some(module) = self.store.module_by_name(&request.module_name)? else {
            warn!(module = %request.module_name, "request for unknown module");
            reply.reply(&SocketReply::failed(&request, "unknown module"))?;
            return Ok(());
        };
        let Some(command) = self
            .store
            .command_by_name(module.uid, &request.module_function)?
        else {
            warn!(
                module = %request.module_name,
                function = %request.module_function,
                "request for unknown command"
            );
            reply.reply(&SocketReply::failed(&request, "unknown command"))?;
            return Ok(());
        };

        info!(
            uid = module.uid,
            command = command.command_id,
            name = %command.name,
            "forwarding command request"
        );
        self.link
            .send(sink, module.uid, &[COMMAND, command.command_id], Priority::Normal, now)?;

        if request.return_output {
            self.pending.push_back(PendingRequest {
                module_uid: module.uid,
                command_id: command.command_id,
                sent_at: now,
                request,
                reply,
            });
        } else {
            reply.reply(&SocketReply::empty(&request))?;
        }
        Ok(())
    }

    /// Send each update to its module, in order.
    pub fn push_updates<K: FrameSink + ?Sized>(
        &mut self,
        sink: &mut K,
        updates: &[EventUpdate],
        now: u64,
    ) -> Result<usize> {
        for update in updates {
            let opcode = match update.kind {
                UpdateKind::Add => EVENT_ADD,
                UpdateKind::Remove => EVENT_REMOVE,
            };
            let mut payload = Vec::with_capacity(update.event.len() + 1);
            payload.push(opcode);
            payload.extend_from_slice(&update.event);
            debug!(module = update.module_uid, kind = ?update.kind, "push event update");
            self.link
                .send(sink, update.module_uid, &payload, Priority::Normal, now)?;
        }
        Ok(updates.len())
    }

    /// Send a bare opcode to the secondary service id.
    pub fn inject<K: FrameSink + ?Sized>(&mut self, sink: &mut K, opcode: u8, now: u64) -> Result<()> {
        debug!(opcode = protocol::opcode_name(opcode), "inject");
        self.link.send(sink, UID_SERVICE, &[opcode], Priority::Normal, now)?;
        Ok(())
    }

    /// Synchronize `definitions` with the store and push whatever changed.
    pub fn apply_flows<K: FrameSink + ?Sized>(
        &mut self,
        sink: &mut K,
        definitions: &[FlowDefinition],
        now: u64,
    ) -> Result<SyncOutcome> {
        let candidates = FlowResolver::new(&self.store).resolve_all(definitions);
        let outcome = sync::synchronize(&mut self.store, &candidates)?;
        self.store.flush()?;
        if outcome.changed {
            info!(updates = outcome.updates.len(), "flows changed");
            self.push_updates(sink, &outcome.updates, now)?;
        } else {
            debug!("flows unchanged");
        }
        Ok(outcome)
    }

    /// Drop acknowledgments that timed out and abandon socket requests that
    /// can no longer be answered.
    ///
    /// A request fails when its COMMAND frame was never acknowledged or when
    /// the module stayed silent for [`REQUEST_TIMEOUT_MS`].
    pub fn sweep(&mut self, now: u64) -> Vec<PendingAck> {
        let dropped = self.link.sweep(now);
        for ack in &dropped {
            warn!(
                module = ack.uid,
                command = protocol::opcode_name(ack.command),
                waited_ms = now.saturating_sub(ack.sent_at),
                "acknowledgment timed out"
            );
            if ack.command == COMMAND {
                if let Some(index) = self.pending.iter().position(|p| p.module_uid == ack.uid) {
                    if let Some(pending) = self.pending.remove(index) {
                        pending.fail("module did not acknowledge the command");
                    }
                }
            }
        }

        let mut waiting = VecDeque::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            if now.saturating_sub(pending.sent_at) > REQUEST_TIMEOUT_MS {
                pending.fail("module did not reply in time");
            } else {
                waiting.push_back(pending);
            }
        }
        self.pending = waiting;
        dropped
    }
}

fn log_stored_events(from: u16, stream: &[u8]) {
    let mut scan = scan_stream(stream);
    let mut count = 0usize;
    for blob in scan.by_ref() {
        match Event::deserialize(blob) {
            Ok(event) => info!(from, %event, "stored event"),
            Err(err) => warn!(from, error = %err, "undecodable stored event"),
        }
        count += 1;
    }
    if scan.remaining() > 0 {
        warn!(from, trailing = scan.remaining(), "stored event stream has trailing bytes");
    }
    info!(from, count, "module event dump");
}

/// Render a wire-tagged command result for a socket client.
///
/// Returns `None` when `bytes` is too short for `tag` or the tag is unknown.
pub fn format_primitive(tag: u8, bytes: &[u8]) -> Option<(String, OutputType)> {
    let size = protocol::primitive_size(tag);
    if tag != primitive::VOID && (size == 0 || bytes.len() < size) {
        return None;
    }
    let b = &bytes[..size];
    let formatted = match tag {
        primitive::U8 => (b[0].to_string(), OutputType::UnsignedInt),
        primitive::U16 => (u16::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::UnsignedInt),
        primitive::U32 => (u32::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::UnsignedInt),
        primitive::U64 => (u64::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::UnsignedBigInt),
        primitive::I8 => ((b[0] as i8).to_string(), OutputType::SignedInt),
        primitive::I16 => (i16::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::SignedInt),
        primitive::I32 => (i32::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::SignedInt),
        primitive::I64 => (i64::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::SignedBigInt),
        primitive::F32 => (f32::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::Float),
        primitive::F64 => (f64::from_le_bytes(b.try_into().ok()?).to_string(), OutputType::Double),
        primitive::BOOL => ((b[0] != 0).to_string(), OutputType::Bool),
        primitive::VOID => (String::new(), OutputType::Void),
        _ => return None,
    };
    Some(formatted)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use automato_event::{Conditional, IntervalUnit, MainEvent, TaggedValue};
    use automato_frame::protocol::{ACKNOWLEDGEMENT, UID_BROADCAST};
    use automato_frame::{chunk_payload, FrameAddress};
    use automato_link::AckBook;

    use super::*;
    use crate::store::{MemoryStore, ModuleRole};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<SocketReply>>>);

    impl Recorder {
        fn replies(&self) -> Vec<SocketReply> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ReplySink for Recorder {
        fn reply(&mut self, reply: &SocketReply) -> Result<()> {
            self.0.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    const DESCRIPTION: &str = r#"{"Name":"thermo","Type":"Reader","Description":"greenhouse probe","Commands":[{"CommandName":"read","CommandID":1,"ReturnFormat":"f32"}]}"#;

    fn dispatcher() -> Dispatcher<MemoryStore> {
        Dispatcher::new(MemoryStore::new()).unwrap()
    }

    fn with_thermo() -> Dispatcher<MemoryStore> {
        let mut d = dispatcher();
        let mut payload = vec![REPLY_UPDATE_INFO];
        payload.extend_from_slice(DESCRIPTION.as_bytes());
        let mut sink: Vec<Frame> = Vec::new();
        d.dispatch(&mut sink, 7, &payload, 0).unwrap();
        assert!(sink.is_empty());
        d
    }

    fn request(name: &str, function: &str, return_output: bool) -> SocketRequest {
        SocketRequest {
            module_name: name.to_string(),
            module_function: function.to_string(),
            return_output,
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut d = dispatcher();
        let mut sink: Vec<Frame> = Vec::new();
        d.dispatch(&mut sink, 9, &[0x01], 0).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].address.to, 9);
        assert_eq!(sink[0].payload(), &[ERROR_GENERIC, 9]);
        assert!(d.store().modules().unwrap().is_empty());
        assert_eq!(d.link().acks().pending(), 0);
    }

    #[test]
    fn check_in_marks_online_and_requests_info() {
        let mut d = with_thermo();
        d.store_mut().set_module_online(7, false).unwrap();

        let mut sink: Vec<Frame> = Vec::new();
        let frame = Frame::new(FrameAddress::new(7, UID_COORDINATOR), &[CHECK_IN]).unwrap();
        d.handle_frame(&mut sink, &frame, 10).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].payload(), &[ACKNOWLEDGEMENT, CHECK_IN]);
        assert_eq!(sink[1].payload(), &[UPDATE_INFO]);
        assert!(d.store().module(7).unwrap().unwrap().online);
        assert_eq!(d.link().acks().pending(), 1);
    }

    #[test]
    fn new_uid_is_unique_and_big_endian() {
        let mut d = dispatcher();
        let mut seen = HashSet::new();
        for temporary in 2000..2020u16 {
            let mut sink: Vec<Frame> = Vec::new();
            d.dispatch(&mut sink, temporary, &[NEW_UID], 0).unwrap();
            assert_eq!(sink.len(), 1);
            let payload = sink[0].payload();
            assert_eq!(payload[0], REPLY_NEW_UID);
            let uid = u16::from_be_bytes([payload[1], payload[2]]);
            assert!((FIRST_MODULE_UID..UID_POOL_END).contains(&uid));
            assert!(seen.insert(uid), "uid {uid} handed out twice");
        }
    }

    #[test]
    fn update_info_classification() {
        let mut d = with_thermo();
        let module = d.store().module(7).unwrap().unwrap();
        assert_eq!(module.name, "thermo");
        assert_eq!(module.role, ModuleRole::Reader);
        assert_eq!(d.store().command(7, 1).unwrap().unwrap().name, "read");

        let validator = DescriptionValidator::new().unwrap();
        let same = validator.parse(7, DESCRIPTION.as_bytes()).unwrap();
        let report = d.register_description(7, &same).unwrap();
        assert_eq!(report.module, InfoStatus::NotModified);
        assert_eq!(report.commands, vec![(1, InfoStatus::NotModified)]);

        let mut changed = same.clone();
        changed.description = "moved to the shed".to_string();
        changed.commands[0].return_format = "f64".to_string();
        changed.commands.push(crate::schema::CommandDescription {
            name: "reset".to_string(),
            id: 2,
            return_format: "void".to_string(),
        });
        let report = d.register_description(7, &changed).unwrap();
        assert_eq!(report.module, InfoStatus::Modified);
        assert_eq!(
            report.commands,
            vec![(1, InfoStatus::Modified), (2, InfoStatus::NotStored)]
        );
        assert_eq!(d.store().module(7).unwrap().unwrap().description, "moved to the shed");
    }

    #[test]
    fn long_self_description_reassembles() {
        let mut d = dispatcher();
        let mut payload = vec![REPLY_UPDATE_INFO];
        payload.extend_from_slice(DESCRIPTION.as_bytes());
        let frames = chunk_payload(FrameAddress::new(7, UID_COORDINATOR), 42, &payload);
        assert!(frames.len() > 1);

        let mut sink: Vec<Frame> = Vec::new();
        for frame in &frames {
            d.handle_frame(&mut sink, frame, 0).unwrap();
        }
        assert!(d.store().module(7).unwrap().is_some());
        assert!(sink.iter().all(|f| f.payload()[0] == ACKNOWLEDGEMENT));
    }

    #[test]
    fn invalid_description_is_discarded() {
        let mut d = dispatcher();
        let mut sink: Vec<Frame> = Vec::new();
        d.dispatch(&mut sink, 7, b"\x85{\"Name\": 3}", 0).unwrap();
        d.dispatch(&mut sink, 7, b"\x85not json", 0).unwrap();
        assert!(d.store().modules().unwrap().is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn command_reply_answers_oldest_request() {
        let mut d = with_thermo();
        let first = Recorder::default();
        let second = Recorder::default();
        let mut sink: Vec<Frame> = Vec::new();

        d.submit_request(&mut sink, request("thermo", "read", true), Box::new(first.clone()), 0)
            .unwrap();
        d.submit_request(&mut sink, request("thermo", "read", true), Box::new(second.clone()), 0)
            .unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].address.to, 7);
        assert_eq!(sink[0].payload(), &[COMMAND, 1]);
        assert_eq!(d.pending_requests(), 2);

        let mut reply = vec![REPLY_COMMAND, 1, primitive::F32];
        reply.extend_from_slice(&21.5f32.to_le_bytes());
        d.dispatch(&mut sink, 7, &reply, 5).unwrap();

        let answered = first.replies();
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].output, "21.5");
        assert_eq!(answered[0].output_type, OutputType::Float as u8);
        assert!(second.replies().is_empty());
        assert_eq!(d.pending_requests(), 1);

        // A reply from another module does not match.
        d.dispatch(&mut sink, 8, &[REPLY_COMMAND, 1], 6).unwrap();
        assert_eq!(d.pending_requests(), 1);

        d.dispatch(&mut sink, 7, &[REPLY_COMMAND, 1], 7).unwrap();
        let answered = second.replies();
        assert_eq!(answered[0].output, "");
        assert_eq!(answered[0].output_type, 0);
        assert_eq!(d.pending_requests(), 0);
    }

    #[test]
    fn unknown_request_targets_get_an_error_reply() {
        let mut d = with_thermo();
        let recorder = Recorder::default();
        let mut sink: Vec<Frame> = Vec::new();

        d.submit_request(&mut sink, request("pump", "on", true), Box::new(recorder.clone()), 0)
            .unwrap();
        d.submit_request(&mut sink, request("thermo", "on", true), Box::new(recorder.clone()), 0)
            .unwrap();

        assert!(sink.is_empty());
        let replies = recorder.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].error.as_deref(), Some("unknown module"));
        assert_eq!(replies[1].error.as_deref(), Some("unknown command"));
        assert_eq!(d.pending_requests(), 0);
    }

    #[test]
    fn fire_and_forget_request_is_answered_immediately() {
        let mut d = with_thermo();
        let recorder = Recorder::default();
        let mut sink: Vec<Frame> = Vec::new();
        d.submit_request(&mut sink, request("thermo", "read", false), Box::new(recorder.clone()), 0)
            .unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(recorder.replies().len(), 1);
        assert_eq!(d.pending_requests(), 0);
    }

    #[test]
    fn updates_are_sent_in_order() {
        let mut d = dispatcher();
        let event = Event::Main(MainEvent {
            flow_id: 3,
            function_id: 1,
            interval_unit: IntervalUnit::Seconds,
            interval: 5,
            conditional: Conditional::Gt,
            compare_to: TaggedValue::I8(20),
        })
        .to_bytes();
        let updates = vec![
            EventUpdate {
                module_uid: 7,
                kind: UpdateKind::Remove,
                event: event.clone(),
            },
            EventUpdate {
                module_uid: 8,
                kind: UpdateKind::Add,
                event: event.clone(),
            },
        ];
        let mut sink: Vec<Frame> = Vec::new();
        assert_eq!(d.push_updates(&mut sink, &updates, 0).unwrap(), 2);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].address.to, 7);
        assert_eq!(sink[0].payload()[0], EVENT_REMOVE);
        assert_eq!(&sink[0].payload()[1..], event.as_slice());
        assert_eq!(sink[1].address.to, 8);
        assert_eq!(sink[1].payload()[0], EVENT_ADD);
    }

    #[test]
    fn inject_targets_service_id() {
        let mut d = dispatcher();
        let mut sink: Vec<Frame> = Vec::new();
        d.inject(&mut sink, CHECK_IN, 0).unwrap();
        assert_eq!(sink[0].address.to, UID_SERVICE);
        assert_eq!(sink[0].payload(), &[CHECK_IN]);
    }

    #[test]
    fn sweep_reports_unacknowledged_frames() {
        let mut d = dispatcher();
        let mut sink: Vec<Frame> = Vec::new();
        d.inject(&mut sink, CHECK_IN, 100).unwrap();
        assert!(d.sweep(3100).is_empty());
        let dropped = d.sweep(3101);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].uid, UID_SERVICE);
    }

    #[test]
    fn unacknowledged_command_fails_its_request() {
        let mut d = with_thermo();
        let recorder = Recorder::default();
        let mut sink: Vec<Frame> = Vec::new();
        d.submit_request(&mut sink, request("thermo", "read", true), Box::new(recorder.clone()), 0)
            .unwrap();

        d.sweep(3000);
        assert_eq!(d.pending_requests(), 1);
        d.sweep(3001);
        assert_eq!(d.pending_requests(), 0);

        let replies = recorder.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].module_name, "thermo");
        assert!(replies[0].error.is_some());
    }

    #[test]
    fn silent_module_fails_its_request_after_the_deadline() {
        let mut d = with_thermo();
        let recorder = Recorder::default();
        let mut sink: Vec<Frame> = Vec::new();
        d.submit_request(&mut sink, request("thermo", "read", true), Box::new(recorder.clone()), 0)
            .unwrap();
        let ack = Frame::new(FrameAddress::new(7, UID_COORDINATOR), &[ACKNOWLEDGEMENT, COMMAND]).unwrap();
        d.handle_frame(&mut sink, &ack, 5).unwrap();

        d.sweep(REQUEST_TIMEOUT_MS);
        assert_eq!(d.pending_requests(), 1);
        assert!(recorder.replies().is_empty());

        d.sweep(REQUEST_TIMEOUT_MS + 1);
        assert_eq!(d.pending_requests(), 0);
        assert!(recorder.replies()[0].error.is_some());
    }

    #[test]
    fn broadcast_frames_are_not_acknowledged() {
        let mut d = dispatcher();
        let mut sink: Vec<Frame> = Vec::new();
        let frame = Frame::new(FrameAddress::new(7, UID_BROADCAST), &[INVALID]).unwrap();
        d.handle_frame(&mut sink, &frame, 0).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn primitive_formatting() {
        assert_eq!(
            format_primitive(primitive::I16, &(-300i16).to_le_bytes()),
            Some(("-300".to_string(), OutputType::SignedInt))
        );
        assert_eq!(
            format_primitive(primitive::U64, &u64::MAX.to_le_bytes()),
            Some((u64::MAX.to_string(), OutputType::UnsignedBigInt))
        );
        assert_eq!(
            format_primitive(primitive::BOOL, &[1]),
            Some(("true".to_string(), OutputType::Bool))
        );
        assert_eq!(
            format_primitive(primitive::VOID, &[]),
            Some((String::new(), OutputType::Void))
        );
        assert_eq!(format_primitive(primitive::I32, &[1, 2]), None);
        assert_eq!(format_primitive(17, &[1]), None);
    }
}
