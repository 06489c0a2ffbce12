use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use automato_coordinator::{Dispatcher, JsonFlowFile, MemoryStore, Store};
use automato_event::TaggedValue;
use automato_frame::protocol::FIRST_MODULE_UID;
use automato_module::{
    EventStore, MemoryEventStore, ModuleInfo, Node, Role, SystemClock, TEMPORARY_UID_BASE,
    TEMPORARY_UID_SPREAD,
};
use automato_transport::{InterfaceSet, MemoryBus};

const SENSOR: u16 = 77;

struct Coordinator {
    dispatcher: Dispatcher<MemoryStore>,
    interfaces: InterfaceSet,
    start: Instant,
}

impl Coordinator {
    fn new(bus: &MemoryBus) -> Self {
        let mut interfaces = InterfaceSet::new();
        interfaces.add(bus.attach("coordinator")).expect("attach");
        Self {
            dispatcher: Dispatcher::new(MemoryStore::new()).expect("dispatcher"),
            interfaces,
            start: Instant::now(),
        }
    }

    fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn pump(&mut self) {
        while let Some((_, frame)) = self.interfaces.poll_next().expect("poll") {
            let now = self.now();
            self.dispatcher
                .handle_frame(&mut self.interfaces, &frame, now)
                .expect("handle");
        }
    }

    /// Pump until `done` holds, or panic after five seconds.
    fn pump_until(&mut self, what: &str, mut done: impl FnMut(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            self.pump();
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn sensor_node(bus: &MemoryBus, store: MemoryEventStore) -> Node<MemoryEventStore, SystemClock> {
    let mut interfaces = InterfaceSet::for_module();
    interfaces.add(bus.attach("sensor")).expect("attach");
    let description = ModuleInfo::new("sensor", Role::Reader, "temperature probe with a fan")
        .command(1, "temperature", "i16")
        .command(2, "fan", "void")
        .to_json()
        .expect("description");
    Node::new(interfaces, store, SystemClock::new(), description).expect("node")
}

#[test]
fn flow_assigned_by_the_coordinator_runs_on_the_module() {
    let bus = MemoryBus::new();
    let mut coordinator = Coordinator::new(&bus);

    let mut node = sensor_node(&bus, MemoryEventStore::with_uid(SENSOR));
    node.register(1, |_| TaggedValue::I16(30)).expect("register");
    let fan_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fan_runs);
    node.register(2, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        TaggedValue::Unset
    })
    .expect("register");

    let stop = Arc::new(AtomicBool::new(false));
    let runner = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            node.setup(Some(Duration::from_secs(5)))?;
            while !stop.load(Ordering::SeqCst) {
                node.poll()?;
                thread::sleep(Duration::from_millis(1));
            }
            Ok::<_, automato_module::ModuleError>(node)
        })
    };

    coordinator.pump_until("registration", |c| {
        c.dispatcher.store().module(SENSOR).expect("store").is_some()
    });
    assert_eq!(coordinator.dispatcher.store().commands_of(SENSOR).expect("commands").len(), 2);

    let flows = JsonFlowFile::parse(
        Path::new("flows.json"),
        br#"[[
          {"module_name": "sensor", "module_function": "temperature", "section_number": 0,
           "flow_name": "cooling", "conditional": ">", "value_to_check": "20",
           "interval": 20, "interval_unit": "milliseconds"},
          {"module_name": "sensor", "module_function": "fan", "section_number": 1, "next_section": 0}
        ]]"#,
    )
    .expect("flows");
    let now = coordinator.now();
    let outcome = coordinator
        .dispatcher
        .apply_flows(&mut coordinator.interfaces, &flows, now)
        .expect("apply");
    assert_eq!(outcome.new_flows, vec![1]);

    coordinator.pump_until("the fan to run", |_| fan_runs.load(Ordering::SeqCst) >= 2);

    stop.store(true, Ordering::SeqCst);
    let node = runner.join().expect("node thread").expect("node run");
    assert_eq!(node.table().mains().len(), 1);
    assert!(node.table().has_child(1, 1));
}

#[test]
fn module_without_uid_is_assigned_one() {
    let bus = MemoryBus::new();
    let mut coordinator = Coordinator::new(&bus);
    let mut node = sensor_node(&bus, MemoryEventStore::new());

    let runner = thread::spawn(move || {
        let temporary = node.setup(Some(Duration::from_secs(5)))?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while node.uid() == temporary && Instant::now() < deadline {
            node.poll()?;
            thread::sleep(Duration::from_millis(1));
        }
        Ok::<_, automato_module::ModuleError>((temporary, node))
    });

    coordinator.pump_until("the module thread", |_| runner.is_finished());
    let (temporary, mut node) = runner.join().expect("node thread").expect("node run");

    assert!((TEMPORARY_UID_BASE..=TEMPORARY_UID_BASE + TEMPORARY_UID_SPREAD).contains(&temporary));
    let uid = node.uid();
    assert_ne!(uid, temporary);
    assert!(uid >= FIRST_MODULE_UID);
    assert_eq!(node.store_mut().load_uid().expect("uid"), Some(uid));

    // The node checked in again under its new uid; answer the description
    // request it triggers and the module is registered there.
    let stop = Arc::new(AtomicBool::new(false));
    let runner = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                node.poll()?;
                thread::sleep(Duration::from_millis(1));
            }
            Ok::<_, automato_module::ModuleError>(node)
        })
    };
    coordinator.pump_until("registration under the assigned uid", |c| {
        c.dispatcher.store().module(uid).expect("store").is_some()
    });
    stop.store(true, Ordering::SeqCst);
    runner.join().expect("node thread").expect("node run");
    assert!(coordinator.dispatcher.store().module(temporary).expect("store").is_none());
}
