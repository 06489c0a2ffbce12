//! Flow synchronization: diff candidate flows against the stored ones and
//! compute the per-module add/remove instructions.
//!
//! Flows are never edited in place. A candidate whose Main event matches a
//! stored flow and whose every event is already stored keeps that flow. Any
//! other candidate is stored wholesale under a fresh id, and whatever stored
//! flow no candidate claimed is removed.

use automato_event::Event;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::flows::CandidateFlow;
use crate::store::{FlowEventRow, FlowRecord, Store};

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Add,
    Remove,
}

/// One instruction for a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventUpdate {
    pub module_uid: u16,
    pub kind: UpdateKind,
    pub event: Vec<u8>,
}

/// Result of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// All removals first, then all additions.
    pub updates: Vec<EventUpdate>,
    pub changed: bool,
    pub unchanged_flows: Vec<u8>,
    pub new_flows: Vec<u8>,
}

/// What a pass does with one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Skip,
    Keep(u8),
    Store,
}

/// Run one synchronization pass against `store`.
///
/// The pass is planned before anything is written, so a pass that would run
/// out of flow ids fails without touching the store.
pub fn synchronize<S: Store + ?Sized>(
    store: &mut S,
    candidates: &[CandidateFlow],
) -> Result<SyncOutcome> {
    let plans = plan(store, candidates)?;
    let needed = plans.iter().filter(|plan| **plan == Plan::Store).count();
    let max = store.max_flow_id()?;
    if usize::from(max) + needed > usize::from(u8::MAX) {
        warn!(max, needed, "not enough flow ids left for this pass");
        return Err(SyncError::FlowIdsExhausted { max: u8::MAX });
    }

    let mut outcome = SyncOutcome::default();
    store.deactivate_all_flows()?;

    for (candidate, plan) in candidates.iter().zip(plans) {
        match plan {
            Plan::Skip => {}
            Plan::Keep(flow_id) => {
                debug!(flow_id, name = %candidate.name, "flow unchanged");
                store.activate_flow(flow_id)?;
                outcome.unchanged_flows.push(flow_id);
            }
            Plan::Store => {
                let flow_id = fresh_flow_id(store)?;
                store_flow(store, candidate, flow_id, &mut outcome.updates)?;
                outcome.new_flows.push(flow_id);
                info!(flow_id, name = %candidate.name, events = candidate.events.len(), "flow stored");
            }
        }
    }

    for row in store.delete_inactive_flows()? {
        debug!(flow_id = row.flow_id, module = row.module_uid, "retiring event");
        outcome.updates.push(EventUpdate {
            module_uid: row.module_uid,
            kind: UpdateKind::Remove,
            event: row.event,
        });
    }

    outcome
        .updates
        .sort_by_key(|update| update.kind != UpdateKind::Remove);
    outcome.changed = !outcome.updates.is_empty();
    Ok(outcome)
}

/// Decide per candidate whether it keeps a stored flow or needs a new one.
///
/// A candidate whose events repeat an earlier candidate's is skipped.
fn plan<S: Store + ?Sized>(store: &S, candidates: &[CandidateFlow]) -> Result<Vec<Plan>> {
    let mut plans = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        let Some(main) = candidate.main() else {
            warn!(flow = %candidate.name, "candidate flow has no main event; skipping");
            plans.push(Plan::Skip);
            continue;
        };
        if candidates[..index].iter().any(|earlier| earlier.events == candidate.events) {
            warn!(flow = %candidate.name, "duplicate candidate flow; skipping");
            plans.push(Plan::Skip);
            continue;
        }

        let identity = main.event.identity_bytes();
        let plan = match store.find_main_event(main.module_uid, &identity)? {
            Some(row) if matches_stored(store, candidate, row.flow_id)? => Plan::Keep(row.flow_id),
            Some(row) => {
                info!(old_flow_id = row.flow_id, name = %candidate.name, "flow changed");
                Plan::Store
            }
            None => Plan::Store,
        };
        plans.push(plan);
    }
    Ok(plans)
}

/// Every candidate event is stored under `flow_id`, and nothing else is.
fn matches_stored<S: Store + ?Sized>(
    store: &S,
    candidate: &CandidateFlow,
    flow_id: u8,
) -> Result<bool> {
    if store.events_of_flow(flow_id)?.len() != candidate.events.len() {
        return Ok(false);
    }
    for event in &candidate.events {
        let blob = event.event.with_flow_id(flow_id).to_bytes();
        if !store.flow_event_exists(flow_id, event.module_uid, &blob)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn fresh_flow_id<S: Store + ?Sized>(store: &S) -> Result<u8> {
    store
        .max_flow_id()?
        .checked_add(1)
        .ok_or(SyncError::FlowIdsExhausted { max: u8::MAX })
}

fn store_flow<S: Store + ?Sized>(
    store: &mut S,
    candidate: &CandidateFlow,
    flow_id: u8,
    updates: &mut Vec<EventUpdate>,
) -> Result<()> {
    store.insert_flow(FlowRecord {
        flow_id,
        name: candidate.name.clone(),
        active: true,
    })?;
    for candidate_event in &candidate.events {
        let event: Event = candidate_event.event.with_flow_id(flow_id);
        let blob = event.to_bytes();
        store.insert_flow_event(FlowEventRow {
            flow_id,
            module_uid: candidate_event.module_uid,
            section: event.section(),
            event: blob.clone(),
        })?;
        updates.push(EventUpdate {
            module_uid: candidate_event.module_uid,
            kind: UpdateKind::Add,
            event: blob,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use automato_event::{
        CommandEvent, Conditional, IfEvent, IntervalUnit, MainEvent, TaggedValue,
    };

    use super::*;
    use crate::flows::CandidateEvent;
    use crate::store::MemoryStore;

    const SENSOR: u16 = 10;
    const RELAY: u16 = 11;

    fn flow(command_function: u8) -> CandidateFlow {
        CandidateFlow {
            name: "greenhouse".to_string(),
            events: vec![
                CandidateEvent {
                    module_uid: SENSOR,
                    event: Event::Main(MainEvent {
                        flow_id: 0,
                        function_id: 1,
                        interval_unit: IntervalUnit::Seconds,
                        interval: 10,
                        conditional: Conditional::Gt,
                        compare_to: TaggedValue::I8(30),
                    }),
                },
                CandidateEvent {
                    module_uid: SENSOR,
                    event: Event::If(IfEvent {
                        flow_id: 0,
                        function_id: 2,
                        section: 2,
                        if_true: 1,
                        if_false: 0,
                        conditional: Conditional::Ge,
                        compare_to: TaggedValue::I8(50),
                    }),
                },
                CandidateEvent {
                    module_uid: RELAY,
                    event: Event::Command(CommandEvent {
                        flow_id: 0,
                        function_id: command_function,
                        section: 1,
                        next_section: 0,
                    }),
                },
            ],
        }
    }

    #[test]
    fn new_flow_is_stored_and_added() {
        let mut store = MemoryStore::new();
        let outcome = synchronize(&mut store, &[flow(1)]).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.new_flows, vec![1]);
        assert_eq!(outcome.updates.len(), 3);
        assert!(outcome.updates.iter().all(|u| u.kind == UpdateKind::Add));
        assert!(outcome.updates.iter().all(|u| u.event[1] == 1));
        assert_eq!(outcome.updates[2].module_uid, RELAY);
        assert_eq!(store.events_of_flow(1).unwrap().len(), 3);
    }

    #[test]
    fn identical_flow_produces_no_updates() {
        let mut store = MemoryStore::new();
        synchronize(&mut store, &[flow(1)]).unwrap();

        let outcome = synchronize(&mut store, &[flow(1)]).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.unchanged_flows, vec![1]);
        let flows = store.flows().unwrap();
        assert_eq!(flows.len(), 1);
        assert!(flows[0].active);
    }

    #[test]
    fn changed_flow_is_replaced_removes_first() {
        let mut store = MemoryStore::new();
        synchronize(&mut store, &[flow(1)]).unwrap();
        let old_rows = store.events_of_flow(1).unwrap();

        let outcome = synchronize(&mut store, &[flow(2)]).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.new_flows, vec![2]);
        assert_eq!(outcome.updates.len(), 6);

        let kinds: Vec<UpdateKind> = outcome.updates.iter().map(|u| u.kind).collect();
        assert_eq!(&kinds[..3], &[UpdateKind::Remove; 3]);
        assert_eq!(&kinds[3..], &[UpdateKind::Add; 3]);

        let removed: Vec<&[u8]> = outcome.updates[..3].iter().map(|u| u.event.as_slice()).collect();
        for row in &old_rows {
            assert!(removed.contains(&row.event.as_slice()));
        }
        assert!(outcome.updates[3..].iter().all(|u| u.event[1] == 2));

        let flows = store.flows().unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_id, 2);
        assert!(store.events_of_flow(1).unwrap().is_empty());
    }

    #[test]
    fn dropped_child_counts_as_change() {
        let mut store = MemoryStore::new();
        synchronize(&mut store, &[flow(1)]).unwrap();

        let mut shorter = flow(1);
        shorter.events.pop();
        let outcome = synchronize(&mut store, &[shorter]).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.new_flows, vec![2]);
    }

    #[test]
    fn vanished_flow_is_removed() {
        let mut store = MemoryStore::new();
        synchronize(&mut store, &[flow(1)]).unwrap();

        let outcome = synchronize(&mut store, &[]).unwrap();
        assert_eq!(outcome.updates.len(), 3);
        assert!(outcome.updates.iter().all(|u| u.kind == UpdateKind::Remove));
        assert!(store.flows().unwrap().is_empty());
        assert!(store.flow_events().unwrap().is_empty());
    }

    #[test]
    fn candidate_without_main_is_skipped() {
        let mut store = MemoryStore::new();
        let mut headless = flow(1);
        headless.events.remove(0);
        let outcome = synchronize(&mut store, &[headless, flow(3)]).unwrap();
        assert_eq!(outcome.new_flows, vec![1]);
    }

    #[test]
    fn flow_ids_run_out() {
        let mut store = MemoryStore::new();
        store
            .insert_flow(FlowRecord {
                flow_id: 255,
                name: "last".to_string(),
                active: true,
            })
            .unwrap();
        let err = synchronize(&mut store, &[flow(1)]).unwrap_err();
        assert!(matches!(err, SyncError::FlowIdsExhausted { .. }));
    }

    #[test]
    fn exhausted_pass_leaves_the_store_untouched() {
        let mut store = MemoryStore::new();
        store
            .insert_flow(FlowRecord {
                flow_id: 254,
                name: "old".to_string(),
                active: true,
            })
            .unwrap();
        let mut nursery = flow(1);
        nursery.name = "nursery".to_string();
        if let Event::Main(main) = &mut nursery.events[0].event {
            main.compare_to = TaggedValue::I8(12);
        }

        let err = synchronize(&mut store, &[flow(1), nursery]).unwrap_err();
        assert!(matches!(err, SyncError::FlowIdsExhausted { max: 255 }));
        let flows = store.flows().unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_id, 254);
        assert!(flows[0].active);
        assert!(store.flow_events().unwrap().is_empty());

        // A pass that fits still announces its flow.
        let outcome = synchronize(&mut store, &[flow(1)]).unwrap();
        assert_eq!(outcome.new_flows, vec![255]);
        assert_eq!(outcome.updates.len(), 3);
        assert!(outcome.updates.iter().all(|u| u.kind == UpdateKind::Add));
    }

    #[test]
    fn duplicate_candidates_keep_one_flow() {
        let mut store = MemoryStore::new();
        synchronize(&mut store, &[flow(1)]).unwrap();
        let outcome = synchronize(&mut store, &[flow(1), flow(1)]).unwrap();
        assert_eq!(outcome.unchanged_flows, vec![1]);
        assert!(outcome.new_flows.is_empty());

        let mut fresh = MemoryStore::new();
        let outcome = synchronize(&mut fresh, &[flow(2), flow(2)]).unwrap();
        assert_eq!(outcome.new_flows, vec![1]);
        assert_eq!(fresh.flows().unwrap().len(), 1);
    }
}
