//! The coordinator process: producer threads feeding one dispatch loop.
//!
//! Interface readers, the ack timer, the flow watcher and the socket watcher
//! only push data into [`Inbox`] and signal the condvar. The dispatch loop is
//! the only code that touches the dispatcher and its store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use automato_frame::Frame;
use automato_transport::{InterfaceSet, SerialTransport, SharedTransport, Transport};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{CoordinatorError, Result};
use crate::flows::{FlowDefinition, FlowSource, JsonFlowFile};
use crate::socket::{ClientHandle, SocketBridge, SocketRequest};
use crate::store::{MemoryStore, Store};

const IDLE_POLL: Duration = Duration::from_millis(2);
const SOCKET_POLL: Duration = Duration::from_millis(10);
const WAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// Cooperative stop flag shared by every coordinator thread.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Monotonic milliseconds since the coordinator started.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Inbox {
    frames: VecDeque<(usize, Frame)>,
    requests: Vec<(ClientHandle, SocketRequest)>,
    flows: Option<Vec<FlowDefinition>>,
    sweep_due: bool,
}

impl Inbox {
    fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.requests.is_empty() && self.flows.is_none() && !self.sweep_due
    }
}

#[derive(Default)]
struct Shared {
    inbox: Mutex<Inbox>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Inbox>> {
        self.inbox
            .lock()
            .map_err(|_| CoordinatorError::Runtime("inbox lock poisoned".to_string()))
    }

    fn push(&self, f: impl FnOnce(&mut Inbox)) -> Result<()> {
        f(&mut *self.lock()?);
        self.wake.notify_one();
        Ok(())
    }
}

/// A configured coordinator, ready to run.
pub struct Coordinator<S, F> {
    dispatcher: Dispatcher<S>,
    interfaces: InterfaceSet,
    flows: F,
    bridge: Option<SocketBridge>,
    ack_sweep_interval: Duration,
}

impl Coordinator<MemoryStore, JsonFlowFile> {
    /// Open the store, serial ports, flow file and socket named in `config`.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let store = MemoryStore::open(config.db_file()?)?;

        let mut interfaces = InterfaceSet::new();
        for port in &config.serial_ports {
            let transport = SerialTransport::open(port, config.baud_rate)?;
            interfaces.add(transport)?;
            info!(port = %port.display(), baud = config.baud_rate, "serial interface attached");
        }

        let flows = JsonFlowFile::new(
            config.flows_file()?,
            Duration::from_millis(config.flow_poll_interval_ms),
        );
        let bridge = SocketBridge::bind(&config.socket_path)?;
        info!(path = %bridge.path().display(), "socket bridge listening");

        Ok(Self::new(Dispatcher::new(store)?, interfaces, flows, Some(bridge))
            .with_ack_sweep_interval(Duration::from_millis(config.ack_sweep_interval_ms)))
    }
}

impl<S, F> Coordinator<S, F>
where
    S: Store,
    F: FlowSource + 'static,
{
    pub fn new(
        dispatcher: Dispatcher<S>,
        interfaces: InterfaceSet,
        flows: F,
        bridge: Option<SocketBridge>,
    ) -> Self {
        Self {
            dispatcher,
            interfaces,
            flows,
            bridge,
            ack_sweep_interval: Duration::from_millis(automato_link::ACK_TIMEOUT_MS),
        }
    }

    pub fn with_ack_sweep_interval(mut self, interval: Duration) -> Self {
        self.ack_sweep_interval = interval;
        self
    }

    /// Run until `shutdown` is triggered, then return the dispatcher.
    pub fn run(self, shutdown: Shutdown) -> Result<Dispatcher<S>> {
        let Self {
            mut dispatcher,
            mut interfaces,
            flows,
            bridge,
            ack_sweep_interval,
        } = self;

        let shared = Arc::new(Shared::default());
        let clock = MonotonicClock::new();
        let mut workers = Vec::new();

        for index in 0..interfaces.len() {
            if let Some(handle) = interfaces.handle(index) {
                let name = interfaces.name(index).unwrap_or("unknown").to_string();
                workers.push(spawn_reader(index, name, handle, &shared, &shutdown)?);
            }
        }
        workers.push(spawn_ack_timer(ack_sweep_interval, &shared, &shutdown)?);
        workers.push(spawn_flow_watcher(flows, &shared, &shutdown)?);
        if let Some(bridge) = bridge {
            workers.push(spawn_socket_watcher(bridge, &shared, &shutdown)?);
        }
        info!(interfaces = interfaces.len(), "coordinator running");

        let result = dispatch_loop(&mut dispatcher, &mut interfaces, &shared, &shutdown, clock);

        shutdown.trigger();
        shared.wake.notify_all();
        for worker in workers {
            if worker.join().is_err() {
                error!("coordinator thread panicked");
            }
        }
        dispatcher.store_mut().flush()?;
        info!("coordinator stopped");
        result.map(|()| dispatcher)
    }
}

fn dispatch_loop<S: Store>(
    dispatcher: &mut Dispatcher<S>,
    interfaces: &mut InterfaceSet,
    shared: &Shared,
    shutdown: &Shutdown,
    clock: MonotonicClock,
) -> Result<()> {
    loop {
        let work = {
            let mut inbox = shared.lock()?;
            while inbox.is_empty() && !shutdown.is_triggered() {
                inbox = shared
                    .wake
                    .wait_timeout(inbox, WAKE_TIMEOUT)
                    .map_err(|_| CoordinatorError::Runtime("inbox lock poisoned".to_string()))?
                    .0;
            }
            std::mem::take(&mut *inbox)
        };
        if shutdown.is_triggered() {
            return Ok(());
        }

        let now = clock.now_ms();
        for (index, frame) in work.frames {
            if let Err(err) = dispatcher.handle_frame(interfaces, &frame, now) {
                warn!(interface = index, error = %err, "failed to handle frame");
            }
        }
        for (handle, request) in work.requests {
            let client = handle.id();
            if let Err(err) = dispatcher.submit_request(interfaces, request, Box::new(handle), now) {
                warn!(client, error = %err, "failed to submit socket request");
            }
        }
        if let Some(definitions) = work.flows {
            match dispatcher.apply_flows(interfaces, &definitions, now) {
                Ok(outcome) => debug!(
                    unchanged = outcome.unchanged_flows.len(),
                    new = outcome.new_flows.len(),
                    "flow synchronization finished"
                ),
                Err(err) => error!(error = %err, "flow synchronization failed"),
            }
        }
        if work.sweep_due {
            dispatcher.sweep(now);
        }
    }
}

fn spawn_named(
    name: String,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    Ok(thread::Builder::new().name(name).spawn(body)?)
}

fn spawn_reader(
    index: usize,
    name: String,
    transport: SharedTransport,
    shared: &Arc<Shared>,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let shutdown = shutdown.clone();
    spawn_named(format!("reader-{index}"), move || {
        while !shutdown.is_triggered() {
            let read = match transport.lock() {
                Ok(mut transport) => transport.try_read_frame(),
                Err(_) => {
                    error!(interface = %name, "transport lock poisoned; reader exiting");
                    return;
                }
            };
            match read {
                Ok(Some(frame)) => {
                    if shared.push(|inbox| inbox.frames.push_back((index, frame))).is_err() {
                        return;
                    }
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(err) => {
                    error!(interface = %name, error = %err, "read failed");
                    thread::sleep(WAKE_TIMEOUT);
                }
            }
        }
    })
}

fn spawn_ack_timer(
    interval: Duration,
    shared: &Arc<Shared>,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let shutdown = shutdown.clone();
    spawn_named("ack-timer".to_string(), move || {
        let mut next = Instant::now() + interval;
        while !shutdown.is_triggered() {
            let now = Instant::now();
            if now >= next {
                next = now + interval;
                if shared.push(|inbox| inbox.sweep_due = true).is_err() {
                    return;
                }
            }
            thread::sleep((next - Instant::now().min(next)).min(WAKE_TIMEOUT));
        }
    })
}

fn spawn_flow_watcher<F: FlowSource + 'static>(
    mut flows: F,
    shared: &Arc<Shared>,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let shutdown = shutdown.clone();
    spawn_named("flow-watcher".to_string(), move || {
        let mut changed = true;
        while !shutdown.is_triggered() {
            if changed {
                match flows.read_all() {
                    Ok(definitions) => {
                        info!(flows = definitions.len(), "flow source read");
                        if shared.push(|inbox| inbox.flows = Some(definitions)).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(error = %err, "skipping flow synchronization"),
                }
            }
            changed = match flows.wait_for_change_timeout(WAKE_TIMEOUT) {
                Ok(changed) => changed,
                Err(err) => {
                    warn!(error = %err, "flow source watch failed");
                    thread::sleep(WAKE_TIMEOUT);
                    false
                }
            };
        }
    })
}

fn spawn_socket_watcher(
    mut bridge: SocketBridge,
    shared: &Arc<Shared>,
    shutdown: &Shutdown,
) -> Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let shutdown = shutdown.clone();
    spawn_named("socket-watcher".to_string(), move || {
        while !shutdown.is_triggered() {
            match bridge.poll() {
                Ok(requests) if !requests.is_empty() => {
                    if shared.push(|inbox| inbox.requests.extend(requests)).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "socket poll failed"),
            }
            thread::sleep(SOCKET_POLL);
        }
    })
}
