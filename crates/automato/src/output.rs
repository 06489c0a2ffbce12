use std::io::IsTerminal;

use automato_frame::{opcode_name, Frame};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A value printed as one row of output.
pub trait Record: Serialize {
    fn headers() -> &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

pub fn print_records<R: Record>(records: &[R], format: OutputFormat) {
    print!("{}", render(records, format));
}

/// Render `records`: one JSON object per line, a table, or `key=value` lines.
pub fn render<R: Record>(records: &[R], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => records
            .iter()
            .map(|record| serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string()) + "\n")
            .collect(),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(R::headers().to_vec());
            for record in records {
                table.add_row(record.cells());
            }
            format!("{table}\n")
        }
        OutputFormat::Pretty => records
            .iter()
            .map(|record| {
                let pairs: Vec<String> = R::headers()
                    .iter()
                    .zip(record.cells())
                    .map(|(header, cell)| format!("{}={cell}", header.to_ascii_lowercase()))
                    .collect();
                pairs.join(" ") + "\n"
            })
            .collect(),
    }
}

/// A bus frame as printed by `decode` and `simulate`.
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub sender: Option<String>,
    pub from: u16,
    pub to: u16,
    pub priority: &'static str,
    pub fragment: bool,
    pub opcode: &'static str,
    pub payload: String,
}

impl FrameRecord {
    pub fn new(frame: &Frame, sender: Option<&str>) -> Self {
        Self {
            sender: sender.map(str::to_string),
            from: frame.address.from,
            to: frame.address.to,
            priority: frame.address.priority.name(),
            fragment: frame.address.is_fragment,
            opcode: opcode_name(frame.command_byte()),
            payload: hex(frame.payload()),
        }
    }
}

impl Record for FrameRecord {
    fn headers() -> &'static [&'static str] {
        &["SENDER", "FROM", "TO", "PRIORITY", "FRAGMENT", "OPCODE", "PAYLOAD"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.sender.clone().unwrap_or_else(|| "-".to_string()),
            self.from.to_string(),
            self.to.to_string(),
            self.priority.to_string(),
            self.fragment.to_string(),
            self.opcode.to_string(),
            self.payload.clone(),
        ]
    }
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

/// Parse hex text such as `"0x8d 05 01"` or `"8d0501"`.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .split_whitespace()
        .map(|chunk| chunk.trim_start_matches("0x").trim_start_matches("0X"))
        .collect::<Vec<_>>()
        .concat()
        .chars()
        .filter(|c| *c != ':' && *c != ',')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {text:?}"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}
