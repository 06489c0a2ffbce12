use automato_coordinator::{OutputType, SocketClient, SocketReply, SocketRequest};
use serde::Serialize;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{coordinator_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_records, OutputFormat, Record};

#[derive(Serialize)]
struct ReplyRecord {
    module_name: String,
    module_function: String,
    output: String,
    output_type: &'static str,
    error: Option<String>,
}

impl From<SocketReply> for ReplyRecord {
    fn from(reply: SocketReply) -> Self {
        Self {
            output_type: output_type_name(reply.output_type),
            module_name: reply.module_name,
            module_function: reply.module_function,
            output: reply.output,
            error: reply.error,
        }
    }
}

impl Record for ReplyRecord {
    fn headers() -> &'static [&'static str] {
        &["MODULE", "FUNCTION", "OUTPUT", "TYPE", "ERROR"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.module_name.clone(),
            self.module_function.clone(),
            self.output.clone(),
            self.output_type.to_string(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

fn output_type_name(code: u8) -> &'static str {
    OutputType::from_code(code).map_or("unknown", OutputType::name)
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut client = SocketClient::connect(&args.socket, timeout)
        .map_err(|err| coordinator_error("connect failed", err))?;

    let reply = client
        .request(&SocketRequest {
            module_name: args.module_name,
            module_function: args.module_function,
            return_output: !args.no_output,
        })
        .map_err(|err| coordinator_error("request failed", err))?;

    let failed = reply.error.is_some();
    print_records(&[ReplyRecord::from(reply)], format);
    Ok(if failed { FAILURE } else { SUCCESS })
}
