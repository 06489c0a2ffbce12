//! Persistence for modules, their commands and stored flows.
//!
//! The coordinator only talks to storage through [`Store`]. [`MemoryStore`]
//! keeps everything in memory and can persist a JSON snapshot.

use std::path::{Path, PathBuf};

use automato_event::Event;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Whether a module produces readings or drives outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleRole {
    Reader,
    Writer,
}

impl std::fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub uid: u16,
    pub name: String,
    pub description: String,
    pub role: ModuleRole,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub module_uid: u16,
    pub command_id: u8,
    pub name: String,
    pub return_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: u8,
    pub name: String,
    pub active: bool,
}

/// One stored event of a flow, as sent to its module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEventRow {
    pub flow_id: u8,
    pub module_uid: u16,
    pub section: u8,
    pub event: Vec<u8>,
}

/// The persistence collaborator.
pub trait Store: Send {
    fn module(&self, uid: u16) -> Result<Option<ModuleRecord>>;
    fn modules(&self) -> Result<Vec<ModuleRecord>>;
    fn module_by_name(&self, name: &str) -> Result<Option<ModuleRecord>>;
    fn insert_module(&mut self, module: ModuleRecord) -> Result<()>;
    fn update_module(&mut self, module: ModuleRecord) -> Result<()>;
    /// Returns `false` when no module has this uid.
    fn set_module_online(&mut self, uid: u16, online: bool) -> Result<bool>;
    fn uid_exists(&self, uid: u16) -> Result<bool>;

    fn commands_of(&self, module_uid: u16) -> Result<Vec<CommandRecord>>;
    fn command(&self, module_uid: u16, command_id: u8) -> Result<Option<CommandRecord>>;
    fn command_by_name(&self, module_uid: u16, name: &str) -> Result<Option<CommandRecord>>;
    fn insert_command(&mut self, command: CommandRecord) -> Result<()>;
    fn update_command(&mut self, command: CommandRecord) -> Result<()>;

    fn insert_flow(&mut self, flow: FlowRecord) -> Result<()>;
    fn flows(&self) -> Result<Vec<FlowRecord>>;
    fn deactivate_all_flows(&mut self) -> Result<()>;
    fn activate_flow(&mut self, flow_id: u8) -> Result<()>;
    /// Highest stored flow id, 0 when there are none.
    fn max_flow_id(&self) -> Result<u8>;
    /// Delete inactive flows with their events; returns the deleted event rows.
    fn delete_inactive_flows(&mut self) -> Result<Vec<FlowEventRow>>;

    fn insert_flow_event(&mut self, row: FlowEventRow) -> Result<()>;
    fn flow_events(&self) -> Result<Vec<FlowEventRow>>;
    fn events_of_flow(&self, flow_id: u8) -> Result<Vec<FlowEventRow>>;
    fn flow_event_exists(&self, flow_id: u8, module_uid: u16, event: &[u8]) -> Result<bool>;
    /// Find the stored Main event of `module_uid` with this identity.
    ///
    /// `identity` is the event encoded with flow id 0.
    fn find_main_event(&self, module_uid: u16, identity: &[u8]) -> Result<Option<FlowEventRow>>;

    /// Persist pending changes, if the store is backed by anything.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct Snapshot {
    modules: Vec<ModuleRecord>,
    commands: Vec<CommandRecord>,
    flows: Vec<FlowRecord>,
    flow_events: Vec<FlowEventRow>,
}

/// In-memory store with an optional JSON snapshot file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Snapshot,
    path: Option<PathBuf>,
    dirty: bool,
}

impl MemoryStore {
    /// A store that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path`; a missing file yields an empty store that
    /// will be written there on the first flush.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(?path, "no store snapshot yet; starting empty");
                Snapshot::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            data,
            path: Some(path),
            dirty: false,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Detach from the snapshot file so changes stay in memory.
    pub fn detached(mut self) -> Self {
        self.path = None;
        self
    }

    /// Write the snapshot if the store is file-backed.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(&self.data).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        self.dirty = false;
        debug!(?path, "store snapshot written");
        Ok(())
    }

    fn flow_mut(&mut self, flow_id: u8) -> Result<&mut FlowRecord> {
        self.data
            .flows
            .iter_mut()
            .find(|f| f.flow_id == flow_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "flow",
                key: flow_id.to_string(),
            })
    }
}

fn identity_of(blob: &[u8]) -> Option<Vec<u8>> {
    Event::deserialize(blob).ok().map(|event| event.identity_bytes())
}

impl Store for MemoryStore {
    fn module(&self, uid: u16) -> Result<Option<ModuleRecord>> {
        Ok(self.data.modules.iter().find(|m| m.uid == uid).cloned())
    }

    fn modules(&self) -> Result<Vec<ModuleRecord>> {
        Ok(self.data.modules.clone())
    }

    fn module_by_name(&self, name: &str) -> Result<Option<ModuleRecord>> {
        Ok(self.data.modules.iter().find(|m| m.name == name).cloned())
    }

    fn insert_module(&mut self, module: ModuleRecord) -> Result<()> {
        if self.uid_exists(module.uid)? {
            return Err(StoreError::Duplicate {
                what: "module",
                key: module.uid.to_string(),
            });
        }
        self.data.modules.push(module);
        self.dirty = true;
        Ok(())
    }

    fn update_module(&mut self, module: ModuleRecord) -> Result<()> {
        let slot = self
            .data
            .modules
            .iter_mut()
            .find(|m| m.uid == module.uid)
            .ok_or_else(|| StoreError::NotFound {
                what: "module",
                key: module.uid.to_string(),
            })?;
        *slot = module;
        self.dirty = true;
        Ok(())
    }

    fn set_module_online(&mut self, uid: u16, online: bool) -> Result<bool> {
        match self.data.modules.iter_mut().find(|m| m.uid == uid) {
            Some(module) => {
                module.online = online;
                self.dirty = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn uid_exists(&self, uid: u16) -> Result<bool> {
        Ok(self.data.modules.iter().any(|m| m.uid == uid))
    }

    fn commands_of(&self, module_uid: u16) -> Result<Vec<CommandRecord>> {
        Ok(self
            .data
            .commands
            .iter()
            .filter(|c| c.module_uid == module_uid)
            .cloned()
            .collect())
    }

    fn command(&self, module_uid: u16, command_id: u8) -> Result<Option<CommandRecord>> {
        Ok(self
            .data
            .commands
            .iter()
            .find(|c| c.module_uid == module_uid && c.command_id == command_id)
            .cloned())
    }

    fn command_by_name(&self, module_uid: u16, name: &str) -> Result<Option<CommandRecord>> {
        Ok(self
            .data
            .commands
            .iter()
            .find(|c| c.module_uid == module_uid && c.name == name)
            .cloned())
    }

    fn insert_command(&mut self, command: CommandRecord) -> Result<()> {
        if self.command(command.module_uid, command.command_id)?.is_some() {
            return Err(StoreError::Duplicate {
                what: "command",
                key: format!("{}/{}", command.module_uid, command.command_id),
            });
        }
        self.data.commands.push(command);
        self.dirty = true;
        Ok(())
    }

    fn update_command(&mut self, command: CommandRecord) -> Result<()> {
        let slot = self
            .data
            .commands
            .iter_mut()
            .find(|c| c.module_uid == command.module_uid && c.command_id == command.command_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "command",
                key: format!("{}/{}", command.module_uid, command.command_id),
            })?;
        *slot = command;
        self.dirty = true;
        Ok(())
    }

    fn insert_flow(&mut self, flow: FlowRecord) -> Result<()> {
        if self.data.flows.iter().any(|f| f.flow_id == flow.flow_id) {
            return Err(StoreError::Duplicate {
                what: "flow",
                key: flow.flow_id.to_string(),
            });
        }
        self.data.flows.push(flow);
        self.dirty = true;
        Ok(())
    }

    fn flows(&self) -> Result<Vec<FlowRecord>> {
        Ok(self.data.flows.clone())
    }

    fn deactivate_all_flows(&mut self) -> Result<()> {
        for flow in &mut self.data.flows {
            flow.active = false;
        }
        self.dirty = true;
        Ok(())
    }

    fn activate_flow(&mut self, flow_id: u8) -> Result<()> {
        self.flow_mut(flow_id)?.active = true;
        self.dirty = true;
        Ok(())
    }

    fn max_flow_id(&self) -> Result<u8> {
        Ok(self.data.flows.iter().map(|f| f.flow_id).max().unwrap_or(0))
    }

    fn delete_inactive_flows(&mut self) -> Result<Vec<FlowEventRow>> {
        let inactive: Vec<u8> = self
            .data
            .flows
            .iter()
            .filter(|f| !f.active)
            .map(|f| f.flow_id)
            .collect();
        if inactive.is_empty() {
            return Ok(Vec::new());
        }

        let (removed, kept): (Vec<FlowEventRow>, Vec<FlowEventRow>) =
            std::mem::take(&mut self.data.flow_events)
                .into_iter()
                .partition(|row| inactive.contains(&row.flow_id));
        self.data.flow_events = kept;
        self.data.flows.retain(|f| f.active);
        self.dirty = true;
        Ok(removed)
    }

    fn insert_flow_event(&mut self, row: FlowEventRow) -> Result<()> {
        self.data.flow_events.push(row);
        self.dirty = true;
        Ok(())
    }

    fn flow_events(&self) -> Result<Vec<FlowEventRow>> {
        Ok(self.data.flow_events.clone())
    }

    fn events_of_flow(&self, flow_id: u8) -> Result<Vec<FlowEventRow>> {
        Ok(self
            .data
            .flow_events
            .iter()
            .filter(|row| row.flow_id == flow_id)
            .cloned()
            .collect())
    }

    fn flow_event_exists(&self, flow_id: u8, module_uid: u16, event: &[u8]) -> Result<bool> {
        Ok(self.data.flow_events.iter().any(|row| {
            row.flow_id == flow_id && row.module_uid == module_uid && row.event == event
        }))
    }

    fn find_main_event(&self, module_uid: u16, identity: &[u8]) -> Result<Option<FlowEventRow>> {
        Ok(self
            .data
            .flow_events
            .iter()
            .filter(|row| row.section == 0 && row.module_uid == module_uid)
            .find(|row| identity_of(&row.event).as_deref() == Some(identity))
            .cloned())
    }

    fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
        }
        Ok(())
    }
}
