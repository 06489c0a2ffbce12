use automato_coordinator::{
    synchronize, EventUpdate, FlowResolver, JsonFlowFile, MemoryStore, Store, UpdateKind,
};
use automato_event::Event;
use serde::Serialize;
use tracing::warn;

use crate::cmd::FlowsArgs;
use crate::exit::{coordinator_error, flow_error, io_error, CliResult, SUCCESS};
use crate::output::{print_records, OutputFormat, Record};

#[derive(Debug, Serialize)]
struct UpdateRecord {
    module_uid: u16,
    module: String,
    kind: &'static str,
    event: String,
}

impl Record for UpdateRecord {
    fn headers() -> &'static [&'static str] {
        &["UID", "MODULE", "KIND", "EVENT"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.module_uid.to_string(),
            self.module.clone(),
            self.kind.to_string(),
            self.event.clone(),
        ]
    }
}

pub fn run(args: FlowsArgs, format: OutputFormat) -> CliResult<i32> {
    let mut store = MemoryStore::open(&args.db_file)
        .map_err(|err| coordinator_error("failed to open store", err.into()))?
        .detached();

    let text = std::fs::read(&args.flows)
        .map_err(|err| io_error(&format!("failed reading {}", args.flows.display()), err))?;
    let definitions = JsonFlowFile::parse(&args.flows, &text).map_err(|err| flow_error("invalid flows", err))?;

    let candidates = FlowResolver::new(&store).resolve_all(&definitions);
    if candidates.len() < definitions.len() {
        warn!(
            skipped = definitions.len() - candidates.len(),
            "some flows could not be resolved against the store"
        );
    }
    let outcome = synchronize(&mut store, &candidates)
        .map_err(|err| coordinator_error("synchronization failed", err.into()))?;

    let records = outcome
        .updates
        .iter()
        .map(|update| record(&store, update))
        .collect::<Vec<_>>();
    print_records(&records, format);
    Ok(SUCCESS)
}

fn record(store: &MemoryStore, update: &EventUpdate) -> UpdateRecord {
    let module = store
        .module(update.module_uid)
        .ok()
        .flatten()
        .map_or_else(|| "?".to_string(), |m| m.name);
    let event = Event::deserialize(&update.event).map_or_else(|err| format!("<{err}>"), |e| e.to_string());
    UpdateRecord {
        module_uid: update.module_uid,
        module,
        kind: match update.kind {
            UpdateKind::Add => "add",
            UpdateKind::Remove => "remove",
        },
        event,
    }
}
