//! Reading the externally authored flow file and resolving it to events.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use automato_event::{
    CommandEvent, Conditional, Event, IfEvent, IntervalUnit, MainEvent, TaggedValue,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FlowError;
use crate::store::Store;

pub type Result<T> = std::result::Result<T, FlowError>;

/// A number or a string in the flow file; editors write either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Literal {
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// One event as written in the flow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub module_name: String,
    pub module_function: String,
    pub section_number: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_to_check: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_true: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_false: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_section: Option<u8>,
}

/// One flow as written in the flow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowDefinition {
    pub entries: Vec<FlowEntry>,
}

/// An event resolved against the module registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateEvent {
    pub module_uid: u16,
    pub event: Event,
}

/// A flow ready for synchronization; no flow id assigned yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFlow {
    pub name: String,
    pub events: Vec<CandidateEvent>,
}

impl CandidateFlow {
    pub fn main(&self) -> Option<&CandidateEvent> {
        self.events.iter().find(|e| e.event.is_main())
    }
}

/// Where flow definitions come from.
pub trait FlowSource: Send {
    fn read_all(&mut self) -> Result<Vec<FlowDefinition>>;

    /// Block until the source changes or `timeout` passes. Returns whether it changed.
    fn wait_for_change_timeout(&mut self, timeout: Duration) -> Result<bool>;

    /// Block until the source changes.
    fn wait_for_change(&mut self) -> Result<()> {
        while !self.wait_for_change_timeout(Duration::from_secs(1))? {}
        Ok(())
    }
}

type Fingerprint = Option<(SystemTime, u64)>;

/// The parsed flow JSON file, watched by polling its metadata.
#[derive(Debug)]
pub struct JsonFlowFile {
    path: PathBuf,
    poll_interval: Duration,
    seen: Fingerprint,
}

impl JsonFlowFile {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            seen: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fingerprint(&self) -> Fingerprint {
        let metadata = std::fs::metadata(&self.path).ok()?;
        Some((metadata.modified().ok()?, metadata.len()))
    }

    /// Parse flow definitions from JSON text.
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Vec<FlowDefinition>> {
        serde_json::from_slice(bytes).map_err(|source| FlowError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl FlowSource for JsonFlowFile {
    fn read_all(&mut self) -> Result<Vec<FlowDefinition>> {
        self.seen = self.fingerprint();
        let bytes = std::fs::read(&self.path).map_err(|source| FlowError::Io {
            path: self.path.clone(),
            source,
        })?;
        let flows = Self::parse(&self.path, &bytes)?;
        debug!(path = ?self.path, flows = flows.len(), "flow file read");
        Ok(flows)
    }

    fn wait_for_change_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.fingerprint();
            if current.is_some() && current != self.seen {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

/// Turns flow file entries into events using the module registry.
pub struct FlowResolver<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> FlowResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Resolve every definition, skipping (and logging) the ones that fail.
    pub fn resolve_all(&self, definitions: &[FlowDefinition]) -> Vec<CandidateFlow> {
        definitions
            .iter()
            .enumerate()
            .filter_map(|(index, definition)| match self.resolve(definition) {
                Ok(flow) => Some(flow),
                Err(err) => {
                    warn!(flow = index, error = %err, "skipping flow");
                    None
                }
            })
            .collect()
    }

    pub fn resolve(&self, definition: &FlowDefinition) -> Result<CandidateFlow> {
        let mains = definition
            .entries
            .iter()
            .filter(|e| e.section_number == 0)
            .count();
        match mains {
            0 => return Err(FlowError::NoMainEvent),
            1 => {}
            n => return Err(FlowError::MultipleMainEvents(n)),
        }

        let mut name = String::new();
        let mut events = Vec::with_capacity(definition.entries.len());
        for entry in &definition.entries {
            if entry.section_number == 0 {
                name = entry.flow_name.clone().unwrap_or_default();
            }
            events.push(self.resolve_entry(entry)?);
        }
        Ok(CandidateFlow { name, events })
    }

    fn resolve_entry(&self, entry: &FlowEntry) -> Result<CandidateEvent> {
        let module = self
            .store
            .module_by_name(&entry.module_name)?
            .ok_or_else(|| FlowError::UnknownModule(entry.module_name.clone()))?;
        let command = self
            .store
            .command_by_name(module.uid, &entry.module_function)?
            .ok_or_else(|| FlowError::UnknownCommand {
                module: entry.module_name.clone(),
                function: entry.module_function.clone(),
            })?;

        let section = entry.section_number;
        let function_id = command.command_id;
        let event = if section == 0 {
            let conditional = conditional(entry)?;
            let mut compare_to = compare_value(entry)?;
            // A header byte of 0x00 reads as an empty slot in module storage.
            if let (Conditional::Lt, TaggedValue::I8(v)) = (conditional, compare_to) {
                compare_to = TaggedValue::I16(v.into());
            }
            let unit_text = entry.interval_unit.as_deref().ok_or(FlowError::MissingField {
                section,
                field: "interval_unit",
            })?;
            Event::Main(MainEvent {
                flow_id: 0,
                function_id,
                interval_unit: unit_text
                    .parse::<IntervalUnit>()
                    .map_err(|source| FlowError::InvalidField { section, source })?,
                interval: interval(entry)?,
                conditional,
                compare_to,
            })
        } else if let Some(if_true) = entry.if_true {
            Event::If(IfEvent {
                flow_id: 0,
                function_id,
                section,
                if_true,
                if_false: entry.if_false.ok_or(FlowError::MissingField {
                    section,
                    field: "if_false",
                })?,
                conditional: conditional(entry)?,
                compare_to: compare_value(entry)?,
            })
        } else if let Some(next_section) = entry.next_section {
            Event::Command(CommandEvent {
                flow_id: 0,
                function_id,
                section,
                next_section,
            })
        } else {
            return Err(FlowError::MissingField {
                section,
                field: "next_section or if_true",
            });
        };

        Ok(CandidateEvent {
            module_uid: module.uid,
            event,
        })
    }
}

fn conditional(entry: &FlowEntry) -> Result<Conditional> {
    let section = entry.section_number;
    entry
        .conditional
        .as_deref()
        .ok_or(FlowError::MissingField {
            section,
            field: "conditional",
        })?
        .parse()
        .map_err(|source| FlowError::InvalidField { section, source })
}

fn compare_value(entry: &FlowEntry) -> Result<TaggedValue> {
    let section = entry.section_number;
    let literal = entry.value_to_check.as_ref().ok_or(FlowError::MissingField {
        section,
        field: "value_to_check",
    })?;
    TaggedValue::parse(&literal.as_text())
        .map_err(|source| FlowError::InvalidField { section, source })
}

fn interval(entry: &FlowEntry) -> Result<u8> {
    let text = entry
        .interval
        .as_ref()
        .ok_or(FlowError::MissingField {
            section: entry.section_number,
            field: "interval",
        })?
        .as_text();
    text.trim()
        .parse::<u8>()
        .map_err(|_| FlowError::InvalidInterval(text))
}
