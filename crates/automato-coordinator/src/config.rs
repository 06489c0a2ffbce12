use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

/// Name of the parsed flow file inside the user directory.
pub const FLOWS_FILE_NAME: &str = "automato.parsed.flows.json";

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB1";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/automato/coordinator.sock";
pub const DEFAULT_ACK_SWEEP_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_FLOW_POLL_INTERVAL_MS: u64 = 500;

/// Coordinator settings, read from TOML and overridable from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Directory holding the parsed flow file. Required.
    pub user_dir: Option<PathBuf>,
    /// Store snapshot path. Required.
    pub db_file: Option<PathBuf>,
    pub serial_ports: Vec<PathBuf>,
    pub baud_rate: u32,
    pub socket_path: PathBuf,
    pub ack_sweep_interval_ms: u64,
    pub flow_poll_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            user_dir: None,
            db_file: None,
            serial_ports: vec![PathBuf::from(DEFAULT_SERIAL_PORT)],
            baud_rate: DEFAULT_BAUD_RATE,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            ack_sweep_interval_ms: DEFAULT_ACK_SWEEP_INTERVAL_MS,
            flow_poll_interval_ms: DEFAULT_FLOW_POLL_INTERVAL_MS,
        }
    }
}

impl CoordinatorConfig {
    /// Load a TOML config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoordinatorError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| CoordinatorError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn user_dir(&self) -> Result<&Path> {
        self.user_dir
            .as_deref()
            .ok_or(CoordinatorError::MissingConfig("user_dir"))
    }

    pub fn db_file(&self) -> Result<&Path> {
        self.db_file
            .as_deref()
            .ok_or(CoordinatorError::MissingConfig("db_file"))
    }

    pub fn flows_file(&self) -> Result<PathBuf> {
        Ok(self.user_dir()?.join(FLOWS_FILE_NAME))
    }

    /// Check that every required value is present.
    pub fn validate(&self) -> Result<()> {
        self.user_dir()?;
        self.db_file()?;
        Ok(())
    }
}
