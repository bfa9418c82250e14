//! Crate-level integration and BDD tests.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use crate::codec::{Argument, Value};
use crate::engine::{DispatchSettings, Dispatcher, RetryPolicy};
use crate::error::DispatchError;
use crate::session::SessionState;
use crate::table::CommandTable;
use crate::transport::{Framing, ProcessTransport, SerialTransport};

pub(crate) mod support;

fn write_handler(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write handler");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod handler");
}

fn quick_settings() -> DispatchSettings {
    DispatchSettings {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::none(),
        ..DispatchSettings::default()
    }
}

const DELEGATED_TABLE: &str = r"
connect:
  file: connect.sh
  response: 1
unpark:
  file: unpark.sh
  response: 1
get_coordinates:
  file: get_coordinates.sh
  response: HH:MM:SS sDD*MM:SS
slew_to_coordinates:
  file: slew.sh
  params: HH:MM:SS sDD*MM:SS
  response: 1
park:
  # file: park.sh
  # response: 1
";

#[test]
fn end_to_end_with_delegated_handlers() {
    let dir = TempDir::new().expect("handler dir");
    write_handler(dir.path(), "connect.sh", "echo 1");
    write_handler(dir.path(), "unpark.sh", "echo 1");
    write_handler(dir.path(), "get_coordinates.sh", "echo '05:30:00 -12*30:00'");
    write_handler(
        dir.path(),
        "slew.sh",
        "echo \"$@\" > \"$(dirname \"$0\")/slew.args\"\necho 1",
    );

    let table = CommandTable::load(DELEGATED_TABLE).expect("table loads");
    assert!(table.get("park").is_none());
    let engine = Dispatcher::new(
        table,
        ProcessTransport::new(dir.path()),
        quick_settings(),
    );

    engine.connect().expect("connect");
    engine.dispatch("unpark", &[]).expect("unpark");
    engine
        .dispatch(
            "slew_to_coordinates",
            &[Argument::Float(5.5), Argument::Float(-12.5)],
        )
        .expect("slew");
    let args = fs::read_to_string(dir.path().join("slew.args")).expect("handler ran");
    assert_eq!(args.trim(), "05:30:00 -12*30:00");

    let position = engine.dispatch("get_coordinates", &[]).expect("position");
    assert!(matches!(position, Value::Tuple(ref parts) if parts.len() == 2));

    let error = engine.dispatch("park", &[]).expect_err("park is disabled");
    assert!(matches!(error, DispatchError::NotFound { .. }));
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
    engine.disconnect().expect("disconnect");
}

#[test]
fn end_to_end_with_failing_handler() {
    let dir = TempDir::new().expect("handler dir");
    write_handler(dir.path(), "connect.sh", "echo 1");
    write_handler(dir.path(), "unpark.sh", "echo 'mount offline' >&2\nexit 4");

    let table = CommandTable::load(DELEGATED_TABLE).expect("table loads");
    let engine = Dispatcher::new(
        table,
        ProcessTransport::new(dir.path()),
        quick_settings(),
    );
    engine.connect().expect("connect");

    let error = engine.dispatch("unpark", &[]).expect_err("handler fails");
    assert!(matches!(error, DispatchError::Transport { attempts: 1, .. }));
    assert!(error.to_string().contains("mount offline"), "{error}");
    assert_eq!(engine.state().expect("state"), SessionState::Connected);
}

const NATIVE_TABLE: &str = r"
get_coordinates:
  cmd: GR
  response: HH:MM:SS sDD*MM:SS
unpark:
  cmd: PO
  response: 1
move_ms_north:
  cmd: Mgn
  params: XXXX
";

/// Answers `:GR#` and `:PO#` and reports every frame it reads.
fn emulate_mount(stream: UnixStream, frames: &mpsc::Sender<String>) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::new();
    while matches!(reader.read_until(b'#', &mut frame), Ok(read) if read > 0) {
        let text = String::from_utf8_lossy(&frame).into_owned();
        frame.clear();
        let reply = match text.as_str() {
            ":GR#" => Some("05:30:00 -12*30:00#"),
            ":PO#" => Some("1#"),
            _ => None,
        };
        if reply.is_some_and(|bytes| writer.write_all(bytes.as_bytes()).is_err()) {
            return;
        }
        if frames.send(text).is_err() {
            return;
        }
    }
}

#[test]
fn end_to_end_over_a_framed_stream() {
    let (host, mount) = UnixStream::pair().expect("socket pair");
    let (frames_tx, frames_rx) = mpsc::channel();
    let emulator = thread::spawn(move || emulate_mount(mount, &frames_tx));

    let reader = host.try_clone().expect("clone host socket");
    let transport = SerialTransport::from_stream(reader, host, Framing::default());
    let table = CommandTable::load(NATIVE_TABLE).expect("table loads");
    let engine = Dispatcher::new(table, transport, quick_settings());

    engine.connect().expect("connect");
    engine.dispatch("unpark", &[]).expect("unpark");
    engine
        .dispatch("move_ms_north", &[Argument::Int(250)])
        .expect("pulse");
    let position = engine.dispatch("get_coordinates", &[]).expect("position");
    assert!(matches!(position, Value::Tuple(_)));
    engine.disconnect().expect("disconnect");

    let received: Vec<String> = frames_rx.iter().take(3).collect();
    assert_eq!(received, [":PO#", ":Mgn0250#", ":GR#"]);
    drop(emulator);
}
