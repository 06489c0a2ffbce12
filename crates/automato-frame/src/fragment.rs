//! Splitting oversized payloads into fragment groups and putting them back
//! together.
//!
//! A payload longer than one frame is sent as a run of fragments that share a
//! random group id. Every fragment has the fragment bit set and carries the
//! group id in byte 0 followed by up to 7 payload bytes. The group is complete
//! when a fragment shorter than 8 bytes arrives; if the payload divides evenly
//! into 7-byte chunks, a trailing fragment holding only the group id closes it.

use std::collections::HashMap;

use bytes::BytesMut;
use rand::Rng;

use crate::codec::{Frame, MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::id::FrameAddress;

/// Payload bytes carried by each fragment after the group id.
pub const FRAGMENT_CHUNK: usize = MAX_PAYLOAD - 1;

/// Default number of concurrent groups on a module.
pub const MODULE_GROUPS: usize = 4;

/// Default per-group byte budget on a module.
pub const MODULE_GROUP_BYTES: usize = 64;

/// Pick a group id for a new outbound fragment run.
///
/// Ids are not checked against groups still in flight.
pub fn new_group_id() -> u8 {
    rand::thread_rng().gen_range(1..=u8::MAX)
}

/// Split `payload` into the frames that carry it.
///
/// Payloads of up to 8 bytes become one standard frame. Longer payloads become
/// fragments under `group_id`, with the fragment bit set on `address`.
pub fn chunk_payload(address: FrameAddress, group_id: u8, payload: &[u8]) -> Vec<Frame> {
    if payload.len() <= MAX_PAYLOAD {
        return vec![filled(address.with_fragment(false), &[], payload)];
    }

    let address = address.with_fragment(true);
    let mut frames: Vec<Frame> = payload
        .chunks(FRAGMENT_CHUNK)
        .map(|chunk| filled(address, &[group_id], chunk))
        .collect();

    if payload.len() % FRAGMENT_CHUNK == 0 {
        frames.push(filled(address, &[group_id], &[]));
    }

    frames
}

fn filled(address: FrameAddress, head: &[u8], body: &[u8]) -> Frame {
    let mut bytes = [0u8; MAX_PAYLOAD];
    let len = (head.len() + body.len()).min(MAX_PAYLOAD);
    bytes[..head.len()].copy_from_slice(head);
    bytes[head.len()..len].copy_from_slice(&body[..len - head.len()]);
    Frame::new(address, &bytes[..len]).unwrap_or_default()
}

/// Storage for partially received fragment groups.
pub trait FragmentStore {
    /// Append a fragment's bytes to its group, creating the group if unseen.
    ///
    /// `chunk` is the whole fragment payload; byte 0 repeats the group id and
    /// is not stored.
    fn begin_or_continue(&mut self, group_id: u8, chunk: &[u8]) -> Result<()>;

    /// Remove a group and return its bytes.
    ///
    /// Unknown groups and groups that outgrew their capacity yield `None`.
    fn take(&mut self, group_id: u8) -> Option<Vec<u8>>;

    /// Number of groups currently being assembled.
    fn in_flight(&self) -> usize;

    /// Feed one fragment. Returns the assembled payload once the group completes.
    fn accept(&mut self, frame: &Frame) -> Result<Option<Vec<u8>>> {
        if frame.is_empty() {
            tracing::debug!(from = frame.address.from, "ignoring empty fragment");
            return Ok(None);
        }

        let group_id = frame.byte(0);
        let last = frame.len() < MAX_PAYLOAD;
        if let Err(err) = self.begin_or_continue(group_id, frame.payload()) {
            if last {
                self.take(group_id);
            }
            return Err(err);
        }

        if last {
            return Ok(self.take(group_id));
        }
        Ok(None)
    }
}

/// Unbounded reassembly map used by the coordinator.
#[derive(Debug, Default)]
pub struct GroupReassembler {
    groups: HashMap<u8, BytesMut>,
}

impl GroupReassembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FragmentStore for GroupReassembler {
    fn begin_or_continue(&mut self, group_id: u8, chunk: &[u8]) -> Result<()> {
        let buf = self.groups.entry(group_id).or_default();
        if let Some(body) = chunk.get(1..) {
            buf.extend_from_slice(body);
        }
        Ok(())
    }

    fn take(&mut self, group_id: u8) -> Option<Vec<u8>> {
        self.groups.remove(&group_id).map(|buf| buf.to_vec())
    }

    fn in_flight(&self) -> usize {
        self.groups.len()
    }
}

/// Fixed-capacity reassembly slots used on modules.
///
/// A group that outgrows its slot keeps the slot until its final fragment,
/// with every further byte discarded, and never completes.
#[derive(Debug)]
pub struct SlotReassembler<const GROUPS: usize = MODULE_GROUPS, const BYTES: usize = MODULE_GROUP_BYTES>
{
    used: [bool; GROUPS],
    overflowed: [bool; GROUPS],
    ids: [u8; GROUPS],
    lens: [usize; GROUPS],
    bufs: [[u8; BYTES]; GROUPS],
}

impl<const GROUPS: usize, const BYTES: usize> SlotReassembler<GROUPS, BYTES> {
    pub fn new() -> Self {
        Self {
            used: [false; GROUPS],
            overflowed: [false; GROUPS],
            ids: [0; GROUPS],
            lens: [0; GROUPS],
            bufs: [[0; BYTES]; GROUPS],
        }
    }

    fn find(&self, group_id: u8) -> Option<usize> {
        (0..GROUPS).find(|&i| self.used[i] && self.ids[i] == group_id)
    }

    fn clear(&mut self, slot: usize) {
        self.used[slot] = false;
        self.overflowed[slot] = false;
        self.ids[slot] = 0;
        self.lens[slot] = 0;
        self.bufs[slot] = [0; BYTES];
    }
}

impl<const GROUPS: usize, const BYTES: usize> Default for SlotReassembler<GROUPS, BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const GROUPS: usize, const BYTES: usize> FragmentStore for SlotReassembler<GROUPS, BYTES> {
    fn begin_or_continue(&mut self, group_id: u8, chunk: &[u8]) -> Result<()> {
        let slot = match self.find(group_id) {
            Some(slot) => slot,
            None => {
                let free = (0..GROUPS)
                    .find(|&i| !self.used[i])
                    .ok_or(FrameError::Busy { group_id })?;
                self.used[free] = true;
                self.ids[free] = group_id;
                free
            }
        };

        if self.overflowed[slot] {
            return Ok(());
        }

        let body = chunk.get(1..).unwrap_or_default();
        let start = self.lens[slot];
        let end = start + body.len();
        if end > BYTES {
            self.overflowed[slot] = true;
            self.lens[slot] = 0;
            return Err(FrameError::FrameTooLong {
                group_id,
                max: BYTES,
            });
        }

        self.bufs[slot][start..end].copy_from_slice(body);
        self.lens[slot] = end;
        Ok(())
    }

    fn take(&mut self, group_id: u8) -> Option<Vec<u8>> {
        let slot = self.find(group_id)?;
        let bytes = (!self.overflowed[slot]).then(|| self.bufs[slot][..self.lens[slot]].to_vec());
        self.clear(slot);
        bytes
    }

    fn in_flight(&self) -> usize {
        self.used.iter().filter(|used| **used).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Priority;

    fn addr() -> FrameAddress {
        FrameAddress::new(2, 40).with_priority(Priority::Medium)
    }

    fn reassemble<S: FragmentStore>(store: &mut S, frames: &[Frame]) -> Option<Vec<u8>> {
        let mut out = None;
        for frame in frames {
            if let Some(done) = store.accept(frame).unwrap() {
                assert!(out.is_none(), "group completed twice");
                out = Some(done);
            }
        }
        out
    }

    #[test]
    fn short_payload_is_one_standard_frame() {
        let frames = chunk_payload(addr(), 9, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].address.is_fragment);
        assert_eq!(frames[0].payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn long_payload_chunks_carry_group_id() {
        let payload: Vec<u8> = (1..=10).collect();
        let frames = chunk_payload(addr(), 0x42, &payload);

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.address.is_fragment));
        assert!(frames.iter().all(|f| f.byte(0) == 0x42));
        assert_eq!(frames[0].payload(), &[0x42, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(frames[1].payload(), &[0x42, 8, 9, 10]);
        assert_eq!(frames[1].address.priority, Priority::Medium);
    }

    #[test]
    fn multiple_of_seven_gets_terminator() {
        let payload = [9u8; 14];
        let frames = chunk_payload(addr(), 3, &payload);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].payload(), &[3]);
        assert!(frames[2].len() < MAX_PAYLOAD);
    }

    #[test]
    fn roundtrip_every_length_through_both_stores() {
        for len in 1..=512usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let frames = chunk_payload(addr(), 17, &payload);

            if len <= MAX_PAYLOAD {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].payload(), payload.as_slice());
                continue;
            }

            let mut groups = GroupReassembler::new();
            assert_eq!(reassemble(&mut groups, &frames), Some(payload.clone()), "len {len}");
            assert_eq!(groups.in_flight(), 0);

            let mut slots = SlotReassembler::<4, 512>::new();
            assert_eq!(reassemble(&mut slots, &frames), Some(payload), "len {len}");
            assert_eq!(slots.in_flight(), 0);
        }
    }

    #[test]
    fn take_unknown_group_is_none() {
        let mut groups = GroupReassembler::new();
        assert_eq!(groups.take(5), None);

        let mut slots: SlotReassembler = SlotReassembler::new();
        assert_eq!(slots.take(5), None);
    }

    #[test]
    fn slot_store_reports_busy_when_full() {
        let mut slots = SlotReassembler::<2, 64>::new();
        slots.begin_or_continue(1, &[1, 10]).unwrap();
        slots.begin_or_continue(2, &[2, 20]).unwrap();

        let err = slots.begin_or_continue(3, &[3, 30]).unwrap_err();
        assert!(matches!(err, FrameError::Busy { group_id: 3 }));

        // Existing groups still accept data.
        slots.begin_or_continue(1, &[1, 11]).unwrap();
        assert_eq!(slots.take(1), Some(vec![10, 11]));
    }

    #[test]
    fn slot_store_overflow_abandons_group() {
        let mut slots: SlotReassembler = SlotReassembler::new();
        let chunk = [7u8; 8];
        for _ in 0..9 {
            slots.begin_or_continue(7, &chunk).unwrap();
        }
        assert_eq!(slots.in_flight(), 1);

        let err = slots.begin_or_continue(7, &chunk).unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLong {
                group_id: 7,
                max: 64
            }
        ));
        // The slot stays claimed so the rest of the group is swallowed.
        slots.begin_or_continue(7, &chunk).unwrap();
        assert_eq!(slots.in_flight(), 1);
        assert_eq!(slots.take(7), None);
        assert_eq!(slots.in_flight(), 0);
    }

    #[test]
    fn oversized_group_never_completes() {
        let payload: Vec<u8> = (0..100).collect();
        let frames = chunk_payload(addr(), 9, &payload);

        let mut slots = SlotReassembler::<4, 64>::new();
        let mut errors = 0;
        for frame in &frames {
            match slots.accept(frame) {
                Ok(Some(done)) => panic!("truncated group delivered: {done:?}"),
                Ok(None) => {}
                Err(err) => {
                    assert!(matches!(err, FrameError::FrameTooLong { group_id: 9, max: 64 }));
                    errors += 1;
                }
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(slots.in_flight(), 0);

        // The same group id assembles normally afterwards.
        let short: Vec<u8> = (0..20).collect();
        assert_eq!(reassemble(&mut slots, &chunk_payload(addr(), 9, &short)), Some(short));
    }

    #[test]
    fn overflow_on_final_fragment_frees_the_slot() {
        let mut slots = SlotReassembler::<1, 10>::new();
        assert_eq!(slots.accept(&chunk_payload(addr(), 4, &[1; 14])[0]).unwrap(), None);
        let last = Frame::new(addr().with_fragment(true), &[4, 2, 2, 2, 2]).unwrap();
        assert!(slots.accept(&last).is_err());
        assert_eq!(slots.in_flight(), 0);
    }

    #[test]
    fn interleaved_groups_stay_separate() {
        let a: Vec<u8> = (0..20).collect();
        let b: Vec<u8> = (100..130).collect();
        let fa = chunk_payload(addr(), 1, &a);
        let fb = chunk_payload(addr(), 2, &b);

        let mut groups = GroupReassembler::new();
        let mut done = Vec::new();
        let longest = fa.len().max(fb.len());
        for i in 0..longest {
            for frames in [&fa, &fb] {
                if let Some(frame) = frames.get(i) {
                    if let Some(payload) = groups.accept(frame).unwrap() {
                        done.push(payload);
                    }
                }
            }
        }

        assert_eq!(done, vec![a, b]);
    }

    #[test]
    fn group_ids_are_never_zero() {
        for _ in 0..1000 {
            assert_ne!(new_group_id(), 0);
        }
    }
}
