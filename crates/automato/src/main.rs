mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "automato", version, about = "Automato bus coordinator and tools")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `AUTOMATO_LOG` overrides it.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::DecodeCommand;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "automato",
            "send",
            "sensor",
            "temperature",
            "--socket",
            "/tmp/test.sock",
            "--timeout",
            "2s",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.module_name, "sensor");
                assert!(!args.no_output);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_decode_subcommands() {
        let cli = Cli::try_parse_from(["automato", "--format", "json", "decode", "event", "8d0501"])
            .expect("decode args should parse");
        assert!(matches!(cli.command, Command::Decode(DecodeCommand::Event(_))));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }

    #[test]
    fn serial_ports_split_on_commas() {
        let cli = Cli::try_parse_from([
            "automato",
            "coordinator",
            "--serial-port",
            "/dev/ttyUSB0,/dev/ttyUSB1",
        ])
        .expect("coordinator args should parse");
        match cli.command {
            Command::Coordinator(args) => assert_eq!(args.serial_ports.map(|p| p.len()), Some(2)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_simulated_modules() {
        let err = Cli::try_parse_from(["automato", "simulate", "--modules", "0"])
            .expect_err("zero modules should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
