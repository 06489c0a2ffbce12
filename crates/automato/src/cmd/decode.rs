use automato_event::Event;
use automato_frame::{Frame, WireDecoder, WireEvent};
use serde::Serialize;

use crate::cmd::{DecodeCommand, HexArgs};
use crate::exit::{event_error, frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{hex, parse_hex, print_records, FrameRecord, OutputFormat, Record};

pub fn run(command: DecodeCommand, format: OutputFormat) -> CliResult<i32> {
    match command {
        DecodeCommand::Frame(args) => {
            let frame = decode_frame(&bytes(&args)?)?;
            print_records(&[FrameRecord::new(&frame, None)], format);
        }
        DecodeCommand::Event(args) => {
            let record = decode_event(&bytes(&args)?)?;
            print_records(&[record], format);
        }
        DecodeCommand::Wire(args) => {
            print_records(&decode_wire(&bytes(&args)?), format);
        }
    }
    Ok(SUCCESS)
}

fn bytes(args: &HexArgs) -> CliResult<Vec<u8>> {
    let bytes = parse_hex(&args.hex).map_err(|message| CliError::new(USAGE, message))?;
    if bytes.is_empty() {
        return Err(CliError::new(USAGE, "no bytes to decode"));
    }
    Ok(bytes)
}

fn decode_frame(bytes: &[u8]) -> CliResult<Frame> {
    Frame::try_deserialize(bytes).map_err(|err| frame_error("invalid frame", err))
}

#[derive(Debug, Serialize)]
struct EventRecord {
    size: usize,
    summary: String,
    event: Event,
}

impl Record for EventRecord {
    fn headers() -> &'static [&'static str] {
        &["KIND", "FLOW", "SECTION", "FUNCTION", "SIZE", "SUMMARY"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.event.kind().name().to_string(),
            self.event.flow_id().to_string(),
            self.event.section().to_string(),
            self.event.function_id().to_string(),
            self.size.to_string(),
            self.summary.clone(),
        ]
    }
}

fn decode_event(bytes: &[u8]) -> CliResult<EventRecord> {
    let event = Event::deserialize(bytes).map_err(|err| event_error("invalid event", err))?;
    Ok(EventRecord {
        size: event.serialized_size(),
        summary: event.to_string(),
        event,
    })
}

#[derive(Debug, Serialize)]
struct WireRecord {
    item: &'static str,
    detail: String,
}

impl Record for WireRecord {
    fn headers() -> &'static [&'static str] {
        &["ITEM", "DETAIL"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.item.to_string(), self.detail.clone()]
    }
}

fn decode_wire(bytes: &[u8]) -> Vec<WireRecord> {
    let mut decoder = WireDecoder::new();
    let mut records: Vec<WireRecord> = bytes
        .iter()
        .filter_map(|byte| decoder.push(*byte))
        .map(wire_record)
        .collect();
    if decoder.in_frame() {
        records.push(WireRecord {
            item: "incomplete",
            detail: "stream ends inside a frame".to_string(),
        });
    }
    records.extend(decoder.flush_text().map(wire_record));
    records
}

fn wire_record(event: WireEvent) -> WireRecord {
    match event {
        WireEvent::Frame(frame) => WireRecord {
            item: "frame",
            detail: format!("{frame} (serialized {})", hex(&frame.to_bytes())),
        },
        WireEvent::Text(text) => WireRecord { item: "text", detail: text },
        WireEvent::Dropped(reason) => WireRecord {
            item: "dropped",
            detail: reason,
        },
    }
}
