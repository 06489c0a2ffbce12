use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod coordinator;
pub mod decode;
pub mod flows;
pub mod send;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the coordinator until interrupted.
    Coordinator(CoordinatorArgs),
    /// Request a module command through the coordinator's socket.
    Send(SendArgs),
    /// Decode frame, event or serial wire bytes given as hex.
    #[command(subcommand)]
    Decode(DecodeCommand),
    /// Preview the updates one flow synchronization would send.
    Flows(FlowsArgs),
    /// Run a coordinator and simulated modules on an in-memory bus.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Coordinator(args) => coordinator::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Decode(command) => decode::run(command, format),
        Command::Flows(args) => flows::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CoordinatorArgs {
    /// TOML configuration file.
    #[arg(long, value_name = "FILE", env = "AUTOMATO_CONFIG")]
    pub config: Option<PathBuf>,
    /// Directory holding the parsed flow file.
    #[arg(long, value_name = "DIR", env = "AUTOMATO_USER_DIR")]
    pub user_dir: Option<PathBuf>,
    /// Store snapshot file.
    #[arg(long, value_name = "FILE", env = "AUTOMATO_DB_FILE")]
    pub db_file: Option<PathBuf>,
    /// Serial interface (repeatable, or comma-separated).
    #[arg(long = "serial-port", value_name = "PATH", env = "AUTOMATO_SERIAL_PORT", value_delimiter = ',')]
    pub serial_ports: Option<Vec<PathBuf>>,
    /// Serial speed.
    #[arg(long, env = "AUTOMATO_BAUD_RATE")]
    pub baud_rate: Option<u32>,
    /// Socket bridge path.
    #[arg(long, value_name = "PATH", env = "AUTOMATO_SOCKET")]
    pub socket: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Name of the module, as it described itself.
    pub module_name: String,
    /// Name of the command on that module.
    pub module_function: String,
    /// Socket bridge path.
    #[arg(long, value_name = "PATH", env = "AUTOMATO_SOCKET", default_value = "/tmp/automato/coordinator.sock")]
    pub socket: PathBuf,
    /// Do not wait for the command's output.
    #[arg(long)]
    pub no_output: bool,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Subcommand, Debug)]
pub enum DecodeCommand {
    /// A serialized frame: 4-byte little-endian id, length, payload.
    Frame(HexArgs),
    /// One encoded event.
    Event(HexArgs),
    /// Raw serial bytes, including start/stop markers and diagnostic text.
    Wire(HexArgs),
}

#[derive(Args, Debug)]
pub struct HexArgs {
    /// Bytes as hex, e.g. "0x8d 05 01" or "8d0501".
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct FlowsArgs {
    /// Store snapshot to synchronize against. It is never written.
    #[arg(long, value_name = "FILE", env = "AUTOMATO_DB_FILE")]
    pub db_file: PathBuf,
    /// Parsed flow JSON file.
    #[arg(long, value_name = "FILE")]
    pub flows: PathBuf,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of simulated modules.
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=16))]
    pub modules: u8,
    /// How long to run (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub duration: String,
    /// Parsed flow JSON file to apply once every module has registered.
    #[arg(long, value_name = "FILE")]
    pub flows: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<std::time::Duration> {
    use crate::exit::{CliError, USAGE};
    use std::time::Duration;

    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }
    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
