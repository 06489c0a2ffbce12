#![cfg(all(unix, feature = "cli"))]

use std::path::Path;
use std::process::{Command, Output};

use automato::coordinator::{CommandRecord, MemoryStore, ModuleRecord, ModuleRole, Store};
use automato::event::{CommandEvent, Event};

fn automato(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_automato"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("AUTOMATO_LOG")
        .env_remove("AUTOMATO_DB_FILE")
        .env_remove("AUTOMATO_USER_DIR")
        .env_remove("AUTOMATO_CONFIG")
        .output()
        .expect("automato should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect()
}

fn write_store(path: &Path) {
    let mut store = MemoryStore::open(path).expect("open store");
    for (uid, name, command) in [(21, "sensor", "temperature"), (22, "relay", "on")] {
        store
            .insert_module(ModuleRecord {
                uid,
                name: name.to_string(),
                description: String::new(),
                role: ModuleRole::Reader,
                online: true,
            })
            .expect("module");
        store
            .insert_command(CommandRecord {
                module_uid: uid,
                command_id: 1,
                name: command.to_string(),
                return_format: "i8".to_string(),
            })
            .expect("command");
    }
    store.flush().expect("flush");
}

#[test]
fn decode_event_prints_json() {
    let event = Event::Command(CommandEvent {
        flow_id: 3,
        function_id: 1,
        section: 2,
        next_section: 0,
    });
    let hex: String = event.to_bytes().iter().map(|b| format!("{b:02x}")).collect();

    let output = automato(&["--format", "json", "decode", "event", &hex]);
    assert!(output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event"]["kind"], "command");
    assert_eq!(lines[0]["event"]["flow_id"], 3);
}

#[test]
fn decode_rejects_bad_hex_with_usage_code() {
    let output = automato(&["decode", "frame", "xyz"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn flows_preview_lists_updates_without_touching_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("store.json");
    write_store(&db);
    let before = std::fs::read(&db).expect("snapshot");

    let flows = dir.path().join("flows.json");
    std::fs::write(
        &flows,
        r#"[[
          {"module_name": "sensor", "module_function": "temperature", "section_number": 0,
           "flow_name": "fan", "conditional": ">", "value_to_check": "30",
           "interval": 5, "interval_unit": "seconds"},
          {"module_name": "relay", "module_function": "on", "section_number": 1, "next_section": 0}
        ]]"#,
    )
    .expect("flows");

    let output = automato(&[
        "--format",
        "json",
        "flows",
        "--db-file",
        db.to_str().expect("utf-8 path"),
        "--flows",
        flows.to_str().expect("utf-8 path"),
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line["kind"] == "add"));
    let modules: Vec<_> = lines.iter().map(|line| line["module"].as_str().unwrap_or_default()).collect();
    assert!(modules.contains(&"sensor"));
    assert!(modules.contains(&"relay"));

    assert_eq!(std::fs::read(&db).expect("snapshot"), before);
}

#[test]
fn coordinator_without_db_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = automato(&[
        "coordinator",
        "--user-dir",
        dir.path().to_str().expect("utf-8 path"),
    ]);
    assert_eq!(output.status.code(), Some(30));
    assert!(String::from_utf8_lossy(&output.stderr).contains("db_file"));
}

#[test]
fn send_without_a_coordinator_reports_missing_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("absent.sock");
    let output = automato(&[
        "send",
        "sensor",
        "temperature",
        "--socket",
        socket.to_str().expect("utf-8 path"),
    ]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn simulate_registers_modules() {
    let output = automato(&["--format", "json", "simulate", "--modules", "2", "--duration", "1500ms"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let opcodes: Vec<String> = json_lines(&output)
        .iter()
        .map(|line| line["opcode"].as_str().unwrap_or_default().to_string())
        .collect();
    for expected in ["CHECK_IN", "NEW_UID", "REPLY_NEW_UID", "UPDATE_INFO"] {
        assert!(opcodes.iter().any(|op| op == expected), "no {expected} in {opcodes:?}");
    }
}
