use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use automato_coordinator::{Dispatcher, FlowDefinition, JsonFlowFile, MemoryStore, Store};
use automato_event::TaggedValue;
use automato_module::{MemoryEventStore, ModuleError, ModuleInfo, Node, Role, SystemClock};
use automato_transport::{InterfaceSet, MemoryBus};
use tracing::{info, warn};

use crate::cmd::{parse_duration, SimulateArgs};
use crate::exit::{coordinator_error, flow_error, io_error, module_error, transport_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_records, FrameRecord, OutputFormat};

type SimNode = Node<MemoryEventStore, SystemClock>;

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = parse_duration(&args.duration)?;
    let flows = args.flows.as_deref().map(read_flows).transpose()?;

    let bus = MemoryBus::recording();
    let mut interfaces = InterfaceSet::new();
    interfaces
        .add(bus.attach("coordinator"))
        .map_err(|err| transport_error("attach failed", err))?;
    let mut dispatcher =
        Dispatcher::new(MemoryStore::new()).map_err(|err| coordinator_error("dispatcher", err))?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut nodes = Vec::with_capacity(usize::from(args.modules));
    for index in 1..=args.modules {
        let node = simulated_node(&bus, index)?;
        nodes.push(spawn_node(node, index, duration, Arc::clone(&stop)));
    }

    let start = Instant::now();
    let mut pending_flows = flows;
    while start.elapsed() < duration {
        let now = elapsed_ms(start);
        while let Some((_, frame)) = interfaces
            .poll_next()
            .map_err(|err| transport_error("poll failed", err))?
        {
            dispatcher
                .handle_frame(&mut interfaces, &frame, now)
                .map_err(|err| coordinator_error("dispatch failed", err))?;
        }
        dispatcher.sweep(now);

        let registered = dispatcher
            .store()
            .modules()
            .map_err(|err| coordinator_error("store", err.into()))?
            .len();
        if registered >= usize::from(args.modules) {
            if let Some(definitions) = pending_flows.take() {
                let outcome = dispatcher
                    .apply_flows(&mut interfaces, &definitions, now)
                    .map_err(|err| coordinator_error("flow synchronization failed", err))?;
                info!(updates = outcome.updates.len(), flows = ?outcome.new_flows, "flows applied");
            }
        }
        thread::sleep(Duration::from_millis(1));
    }
    stop.store(true, Ordering::SeqCst);

    let mut failed = false;
    for handle in nodes {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failed = true;
                warn!(error = %module_error("simulated module", err), "module stopped with an error");
            }
            Err(_) => {
                return Err(CliError::new(FAILURE, "simulated module thread panicked"));
            }
        }
    }
    if pending_flows.is_some() {
        warn!("not every module registered in time; flows were not applied");
    }

    let records: Vec<_> = bus
        .take_traffic()
        .iter()
        .map(|(sender, frame)| FrameRecord::new(frame, Some(sender.as_str())))
        .collect();
    print_records(&records, format);
    Ok(if failed { FAILURE } else { SUCCESS })
}

fn read_flows(path: &Path) -> CliResult<Vec<FlowDefinition>> {
    let text = std::fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    JsonFlowFile::parse(path, &text).map_err(|err| flow_error("invalid flows", err))
}

/// Module `sim-N`: command 1 counts its calls, command 2 flips a switch.
fn simulated_node(bus: &MemoryBus, index: u8) -> CliResult<SimNode> {
    let name = format!("sim-{index}");
    let mut interfaces = InterfaceSet::for_module();
    interfaces
        .add(bus.attach(name.clone()))
        .map_err(|err| transport_error("attach failed", err))?;
    let description = ModuleInfo::new(&name, Role::Writer, format!("simulated module {index}"))
        .command(1, "counter", "i16")
        .command(2, "toggle", "bool")
        .to_json()
        .map_err(|err| module_error("description", err))?;

    let mut node = Node::new(interfaces, MemoryEventStore::new(), SystemClock::new(), description)
        .map_err(|err| module_error("module", err))?;
    let mut calls = 0i16;
    node.register(1, move |_| {
        calls = calls.wrapping_add(1);
        TaggedValue::I16(calls)
    })
    .map_err(|err| module_error("register", err))?;
    let mut on = false;
    node.register(2, move |_| {
        on = !on;
        TaggedValue::Bool(on)
    })
    .map_err(|err| module_error("register", err))?;
    Ok(node)
}

fn spawn_node(
    mut node: SimNode,
    index: u8,
    duration: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<Result<(), ModuleError>> {
    thread::spawn(move || {
        match node.setup(Some(duration)) {
            Ok(uid) => info!(module = index, uid, "simulated module checked in"),
            Err(ModuleError::CheckInTimeout { .. }) => return Ok(()),
            Err(err) => return Err(err),
        }
        while !stop.load(Ordering::SeqCst) {
            node.poll()?;
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    })
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
