use automato_frame::protocol::{ACKNOWLEDGEMENT, ERROR_GENERIC};
use automato_frame::{
    chunk_payload, new_group_id, FragmentStore, Frame, FrameAddress, GenericError, Priority,
};
use automato_transport::FrameSink;
use tracing::{debug, warn};

use crate::ack::{AckBook, PendingAck};
use crate::error::{LinkError, Result};

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Not addressed to this node.
    Ignored,
    /// An acknowledgment; the pending entry (if any) was cleared.
    Acknowledged { from: u16, command: u8 },
    /// A complete payload ready for dispatch.
    Payload { from: u16, bytes: Vec<u8> },
    /// A fragment was refused; the sender has been told why.
    Rejected(GenericError),
    /// A fragment was consumed but no payload is ready, either because the
    /// group is still incomplete or because it was abandoned.
    Pending,
}

/// The send/receive path shared by the coordinator and modules.
///
/// Outbound payloads are chunked into frames and registered for
/// acknowledgment. Inbound frames are filtered by address, acknowledged,
/// and reassembled into payloads.
#[derive(Debug)]
pub struct Link<A, F> {
    uid: u16,
    acks: A,
    fragments: F,
}

impl<A: AckBook, F: FragmentStore> Link<A, F> {
    pub fn new(uid: u16, acks: A, fragments: F) -> Self {
        Self {
            uid,
            acks,
            fragments,
        }
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    /// Change the local id, e.g. once a module is assigned its permanent uid.
    pub fn set_uid(&mut self, uid: u16) {
        self.uid = uid;
    }

    pub fn acks(&self) -> &A {
        &self.acks
    }

    pub fn fragments(&self) -> &F {
        &self.fragments
    }

    /// Send `payload` to `to`, fragmenting it if needed.
    ///
    /// Returns the number of frames written.
    pub fn send<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        to: u16,
        payload: &[u8],
        priority: Priority,
        now: u64,
    ) -> Result<usize> {
        self.transmit(sink, to, payload, priority, Some(now))
    }

    /// Send `[ERROR_GENERIC, code]` to `to`.
    ///
    /// Error reports are not tracked for acknowledgment, so a peer that stopped
    /// answering is not reported again for the report itself.
    pub fn send_error<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        to: u16,
        code: GenericError,
    ) -> Result<()> {
        debug!(to, %code, "send error");
        self.transmit(sink, to, &[ERROR_GENERIC, code.code()], Priority::Important, None)?;
        Ok(())
    }

    /// Chunk and write `payload`; with `track_at`, register each frame for
    /// acknowledgment at that time.
    fn transmit<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        to: u16,
        payload: &[u8],
        priority: Priority,
        track_at: Option<u64>,
    ) -> Result<usize> {
        if payload.is_empty() {
            return Err(LinkError::EmptyPayload { to });
        }
        let address = FrameAddress::new(self.uid, to).with_priority(priority);
        let frames = chunk_payload(address, new_group_id(), payload);
        for frame in &frames {
            debug!(%frame, "send");
            sink.send_frame(frame)?;
            let Some(now) = track_at else { continue };
            if !frame.address.is_broadcast() && !is_ack(frame) {
                let command = frame.command_byte();
                if !self.acks.await_ack(to, command, now) {
                    warn!(to, command, "no free acknowledgment slot; not tracking frame");
                }
            }
        }
        Ok(frames.len())
    }

    /// Process one inbound frame.
    pub fn receive<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        frame: &Frame,
    ) -> Result<Inbound> {
        if frame.is_invalid() || !frame.address.is_for(self.uid) {
            return Ok(Inbound::Ignored);
        }
        let from = frame.address.from;

        if is_ack(frame) {
            let command = frame.byte(1);
            if !self.acks.acknowledge(from, command) {
                debug!(from, command, "acknowledgment without a pending entry");
            }
            return Ok(Inbound::Acknowledged { from, command });
        }

        if !frame.address.is_broadcast() {
            let ack = Frame::new(
                FrameAddress::new(self.uid, from).with_priority(Priority::Important),
                &[ACKNOWLEDGEMENT, frame.command_byte()],
            )?;
            sink.send_frame(&ack)?;
        }

        if !frame.address.is_fragment {
            return Ok(Inbound::Payload {
                from,
                bytes: frame.payload().to_vec(),
            });
        }

        match self.fragments.accept(frame) {
            Ok(Some(bytes)) => Ok(Inbound::Payload { from, bytes }),
            Ok(None) => Ok(Inbound::Pending),
            Err(err) => match err.generic_error() {
                Some(code) => {
                    warn!(from, error = %err, "fragment rejected");
                    self.send_error(sink, from, code)?;
                    Ok(Inbound::Rejected(code))
                }
                None => Err(err.into()),
            },
        }
    }

    /// Remove and return acknowledgments that timed out.
    pub fn sweep(&mut self, now: u64) -> Vec<PendingAck> {
        self.acks.sweep(now)
    }
}

fn is_ack(frame: &Frame) -> bool {
    !frame.address.is_fragment && frame.byte(0) == ACKNOWLEDGEMENT
}

#[cfg(test)]
mod tests {
    use automato_frame::protocol::{CHECK_IN, REPLY_UPDATE_INFO, UID_BROADCAST, UID_COORDINATOR};
    use automato_frame::{GroupReassembler, SlotReassembler};

    use super::*;
    use crate::ack::{AckSlots, AckTracker, ACK_TIMEOUT_MS};

    type CoordinatorLink = Link<AckTracker, GroupReassembler>;
    type ModuleLink = Link<AckSlots<12>, SlotReassembler<4, 64>>;

    fn coordinator() -> CoordinatorLink {
        Link::new(UID_COORDINATOR, AckTracker::new(), GroupReassembler::new())
    }

    fn module(uid: u16) -> ModuleLink {
        Link::new(uid, AckSlots::new(), SlotReassembler::new())
    }

    #[test]
    fn short_payload_is_one_tracked_frame() {
        let mut link = module(9);
        let mut sent = Vec::new();
        let count = link
            .send(&mut sent, UID_COORDINATOR, &[CHECK_IN], Priority::Medium, 0)
            .expect("send should succeed");

        assert_eq!(count, 1);
        assert_eq!(sent[0].address.priority, Priority::Medium);
        assert_eq!(sent[0].payload(), &[CHECK_IN]);
        assert_eq!(link.acks().pending(), 1);
    }

    #[test]
    fn error_reports_are_not_tracked() {
        let mut link = module(9);
        let mut sent = Vec::new();
        link.send_error(&mut sent, UID_COORDINATOR, GenericError::Busy).unwrap();

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload(), &[ERROR_GENERIC, GenericError::Busy.code()]);
        assert_eq!(sent[0].address.priority, Priority::Important);
        assert_eq!(link.acks().pending(), 0);
    }

    #[test]
    fn broadcasts_are_not_tracked() {
        let mut link = module(9);
        let mut sent = Vec::new();
        link.send(&mut sent, UID_BROADCAST, &[144, 5, 2], Priority::Normal, 0)
            .unwrap();
        assert_eq!(link.acks().pending(), 0);
    }

    #[test]
    fn empty_payload_is_refused() {
        let mut link = coordinator();
        let mut sent = Vec::new();
        assert!(matches!(
            link.send(&mut sent, 9, &[], Priority::Normal, 0),
            Err(LinkError::EmptyPayload { to: 9 })
        ));
        assert!(sent.is_empty());
    }

    #[test]
    fn receiver_acknowledges_and_sender_clears() {
        let mut sender = module(9);
        let mut receiver = coordinator();
        let mut wire = Vec::new();
        sender
            .send(&mut wire, UID_COORDINATOR, &[CHECK_IN], Priority::Medium, 0)
            .unwrap();

        let mut replies = Vec::new();
        let inbound = receiver.receive(&mut replies, &wire[0]).unwrap();
        assert_eq!(
            inbound,
            Inbound::Payload {
                from: 9,
                bytes: vec![CHECK_IN]
            }
        );
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload(), &[ACKNOWLEDGEMENT, CHECK_IN]);
        assert_eq!(replies[0].address.to, 9);

        let mut none = Vec::new();
        let inbound = sender.receive(&mut none, &replies[0]).unwrap();
        assert_eq!(
            inbound,
            Inbound::Acknowledged {
                from: UID_COORDINATOR,
                command: CHECK_IN
            }
        );
        assert!(none.is_empty(), "acknowledgments are never acknowledged");
        assert_eq!(sender.acks().pending(), 0);
    }

    #[test]
    fn frames_for_others_are_ignored() {
        let mut link = module(9);
        let frame = Frame::new(FrameAddress::new(2, 10), &[CHECK_IN]).unwrap();
        let mut sent = Vec::new();
        assert_eq!(link.receive(&mut sent, &frame).unwrap(), Inbound::Ignored);
        assert_eq!(
            link.receive(&mut sent, &Frame::invalid()).unwrap(),
            Inbound::Ignored
        );
        assert!(sent.is_empty());
    }

    #[test]
    fn broadcast_payloads_are_not_acknowledged() {
        let mut link = module(9);
        let frame = Frame::new(FrameAddress::new(10, UID_BROADCAST), &[144, 5, 2]).unwrap();
        let mut sent = Vec::new();
        let inbound = link.receive(&mut sent, &frame).unwrap();
        assert!(matches!(inbound, Inbound::Payload { from: 10, .. }));
        assert!(sent.is_empty());
    }

    #[test]
    fn long_payload_reassembles() {
        let mut sender = module(9);
        let mut receiver = coordinator();
        let payload: Vec<u8> = std::iter::once(REPLY_UPDATE_INFO)
            .chain((0..40).map(|i| b'a' + (i % 26)))
            .collect();

        let mut wire = Vec::new();
        sender
            .send(&mut wire, UID_COORDINATOR, &payload, Priority::Normal, 0)
            .unwrap();
        assert!(wire.len() > 1);

        let mut replies = Vec::new();
        let mut result = None;
        for frame in &wire {
            match receiver.receive(&mut replies, frame).unwrap() {
                Inbound::Payload { bytes, .. } => result = Some(bytes),
                Inbound::Pending => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(result, Some(payload));
        assert_eq!(replies.len(), wire.len());
        assert_eq!(receiver.fragments().in_flight(), 0);
    }

    #[test]
    fn oversized_group_is_rejected_with_error() {
        let mut sender = coordinator();
        let mut receiver = module(9);
        let payload = vec![7u8; 100];

        let mut wire = Vec::new();
        sender.send(&mut wire, 9, &payload, Priority::Normal, 0).unwrap();

        let mut replies = Vec::new();
        let outcomes: Vec<Inbound> = wire
            .iter()
            .map(|frame| receiver.receive(&mut replies, frame).unwrap())
            .collect();
        assert!(outcomes.contains(&Inbound::Rejected(GenericError::FrameTooLong)));
        assert!(
            !outcomes.iter().any(|outcome| matches!(outcome, Inbound::Payload { .. })),
            "no part of an oversized group may be dispatched"
        );
        assert_eq!(receiver.fragments().in_flight(), 0);

        let errors: Vec<&Frame> = replies
            .iter()
            .filter(|f| f.byte(0) == ERROR_GENERIC)
            .collect();
        assert!(!errors.is_empty());
        assert_eq!(errors[0].payload(), &[ERROR_GENERIC, GenericError::FrameTooLong.code()]);
        assert_eq!(errors[0].address.to, UID_COORDINATOR);
    }

    #[test]
    fn sweep_reports_unanswered_frames() {
        let mut link = coordinator();
        let mut sent = Vec::new();
        link.send(&mut sent, 9, &[136, 1], Priority::Normal, 0).unwrap();
        assert!(link.sweep(ACK_TIMEOUT_MS).is_empty());
        let dropped = link.sweep(ACK_TIMEOUT_MS + 1);
        assert_eq!(dropped.len(), 1);
        assert_eq!((dropped[0].uid, dropped[0].command), (9, 136));
    }
}
