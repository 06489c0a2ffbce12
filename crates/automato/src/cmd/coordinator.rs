use automato_coordinator::{Coordinator, CoordinatorConfig, Shutdown};
use tracing::info;

use crate::cmd::CoordinatorArgs;
use crate::exit::{coordinator_error, CliError, CliResult, FAILURE, INTERRUPTED};

pub fn run(args: CoordinatorArgs) -> CliResult<i32> {
    let config = resolve_config(args)?;
    config
        .validate()
        .map_err(|err| coordinator_error("invalid configuration", err))?;

    let coordinator =
        Coordinator::from_config(&config).map_err(|err| coordinator_error("startup failed", err))?;

    let shutdown = Shutdown::new();
    install_ctrlc_handler(shutdown.clone())?;

    info!(socket = %config.socket_path.display(), "coordinator running");
    let dispatcher = coordinator
        .run(shutdown)
        .map_err(|err| coordinator_error("coordinator failed", err))?;
    info!(pending = dispatcher.pending_requests(), "coordinator stopped");
    Ok(INTERRUPTED)
}

/// Start from the config file (or defaults) and apply command-line overrides.
fn resolve_config(args: CoordinatorArgs) -> CliResult<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::load(path).map_err(|err| coordinator_error("config", err))?,
        None => CoordinatorConfig::default(),
    };
    if let Some(dir) = args.user_dir {
        config.user_dir = Some(dir);
    }
    if let Some(file) = args.db_file {
        config.db_file = Some(file);
    }
    if let Some(ports) = args.serial_ports {
        config.serial_ports = ports;
    }
    if let Some(baud) = args.baud_rate {
        config.baud_rate = baud;
    }
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    Ok(config)
}

fn install_ctrlc_handler(shutdown: Shutdown) -> CliResult<()> {
    ctrlc::set_handler(move || shutdown.trigger())
        .map_err(|err| CliError::new(FAILURE, format!("signal handler setup failed: {err}")))
}
