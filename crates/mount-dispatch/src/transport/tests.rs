//! Unit tests for the serial and process transports.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use mockall::{mock, predicate::eq};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

const SHORT: Duration = Duration::from_millis(50);
const LONG: Duration = Duration::from_secs(5);

mock! {
    pub Channel {}

    impl Transport for Channel {
        fn open(&mut self) -> Result<(), TransportError>;
        fn close(&mut self) -> Result<(), TransportError>;
        fn send(&mut self, request: &WireRequest) -> Result<(), TransportError>;
        fn receive(&mut self, timeout: Duration) -> Result<String, TransportError>;
    }
}

fn frame(body: &str) -> WireRequest {
    WireRequest::Frame(body.to_owned())
}

// ---------------------------------------------------------------------------
// Provided exchange
// ---------------------------------------------------------------------------

#[test]
fn exchange_receives_when_a_reply_is_expected() {
    let mut channel = MockChannel::new();
    channel
        .expect_send()
        .with(eq(frame("GS")))
        .times(1)
        .returning(|_| Ok(()));
    channel
        .expect_receive()
        .with(eq(LONG))
        .times(1)
        .returning(|_| Ok(String::from("1")));

    let reply = channel
        .exchange(&frame("GS"), Reply::Expected, LONG)
        .expect("exchange succeeds");
    assert_eq!(reply.as_deref(), Some("1"));
    assert_eq!(channel.delivery(), Delivery::Unconfirmed);
}

#[test]
fn exchange_skips_receive_without_reply() {
    let mut channel = MockChannel::new();
    channel.expect_send().times(1).returning(|_| Ok(()));
    channel.expect_receive().never();

    let reply = channel
        .exchange(&frame("mn00250"), Reply::None, LONG)
        .expect("exchange succeeds");
    assert!(reply.is_none());
}

#[test]
fn boxed_transports_forward_calls() {
    let mut channel = MockChannel::new();
    channel.expect_open().times(1).returning(|| Ok(()));
    channel
        .expect_close()
        .times(1)
        .returning(|| Err(TransportError::Closed));
    let mut boxed: Box<dyn Transport> = Box::new(channel);
    boxed.open().expect("open forwards");
    assert!(matches!(boxed.close(), Err(TransportError::Closed)));
}

// ---------------------------------------------------------------------------
// SerialTransport
// ---------------------------------------------------------------------------

struct SerialPair {
    transport: SerialTransport,
    mount: UnixStream,
}

#[fixture]
fn serial() -> SerialPair {
    let (host, mount) = UnixStream::pair().expect("socket pair");
    let reader = host.try_clone().expect("clone host socket");
    let mut transport = SerialTransport::from_stream(reader, host, Framing::default());
    transport.open().expect("open stream");
    SerialPair { transport, mount }
}

fn read_exact_text(stream: &mut UnixStream, len: usize) -> String {
    let mut buffer = vec![0_u8; len];
    stream.read_exact(&mut buffer).expect("read frame");
    String::from_utf8(buffer).expect("utf-8 frame")
}

#[test]
fn default_framing_wraps_body() {
    assert_eq!(Framing::default().frame("GLT"), ":GLT#");
}

#[test]
fn non_ascii_response_terminator_is_rejected() {
    let result = Framing::new(":", "#", 'é');
    assert!(matches!(result, Err(TransportError::Unsupported { .. })));
}

#[rstest]
fn serial_writes_framed_commands_and_reads_replies(mut serial: SerialPair) {
    serial.transport.send(&frame("GLT")).expect("send");
    assert_eq!(read_exact_text(&mut serial.mount, 5), ":GLT#");

    serial.mount.write_all(b"+480241018123005#").expect("reply");
    let reply = serial.transport.receive(LONG).expect("receive");
    assert_eq!(reply, "+480241018123005");
}

#[rstest]
fn serial_times_out_without_reply(mut serial: SerialPair) {
    let error = serial.transport.receive(SHORT).expect_err("no reply");
    assert!(matches!(error, TransportError::Timeout { timeout_ms: 50 }));
}

#[rstest]
fn serial_discards_stale_replies_before_sending(mut serial: SerialPair) {
    serial.mount.write_all(b"late#").expect("late reply");
    thread::sleep(Duration::from_millis(200));

    serial.transport.send(&frame("GS")).expect("send");
    serial.mount.write_all(b"fresh#").expect("fresh reply");
    assert_eq!(serial.transport.receive(LONG).expect("receive"), "fresh");
}

#[rstest]
fn serial_end_of_stream_is_closed(serial: SerialPair) {
    let SerialPair {
        mut transport,
        mount,
    } = serial;
    drop(mount);
    let error = transport.receive(LONG).expect_err("stream closed");
    assert!(matches!(error, TransportError::Closed));
}

#[rstest]
fn serial_rejects_handler_invocations(mut serial: SerialPair) {
    let request = WireRequest::Invocation(Invocation::new("park.py", Vec::new()));
    let error = serial.transport.send(&request).expect_err("unsupported");
    assert!(matches!(error, TransportError::Unsupported { .. }));
}

#[test]
fn serial_requires_open() {
    let (host, _mount) = UnixStream::pair().expect("socket pair");
    let reader = host.try_clone().expect("clone");
    let mut transport = SerialTransport::from_stream(reader, host, Framing::default());
    let error = transport.send(&frame("GS")).expect_err("not open");
    assert!(matches!(error, TransportError::NotOpen));
}

#[test]
fn serial_stream_cannot_reopen_after_close() {
    let (host, _mount) = UnixStream::pair().expect("socket pair");
    let reader = host.try_clone().expect("clone");
    let mut transport = SerialTransport::from_stream(reader, host, Framing::default());
    transport.open().expect("first open");
    transport.close().expect("close");
    assert!(matches!(transport.open(), Err(TransportError::Closed)));
}

#[test]
fn serial_device_keeps_every_reply_across_reconnects() {
    let dir = TempDir::new().expect("temp dir");
    let device = dir.path().join("mount");
    let status = Command::new("mkfifo")
        .arg(&device)
        .status()
        .expect("run mkfifo");
    assert!(status.success());

    // A fifo opened for reading and writing echoes every frame back.
    let mut transport = SerialTransport::device(&device, Framing::default());
    for cycle in 0..10 {
        transport.open().expect("open device");
        let body = format!("GS{cycle}");
        transport.send(&frame(&body)).expect("send");
        let reply = transport.receive(LONG).expect("echoed reply");
        assert_eq!(reply, format!(":{body}"));
        transport.close().expect("close");
    }
}

// ---------------------------------------------------------------------------
// ProcessTransport
// ---------------------------------------------------------------------------

fn write_handler(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write handler");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod handler");
}

#[fixture]
fn handlers() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_handler(dir.path(), "echo.sh", "echo \"  $*  \"");
    write_handler(dir.path(), "fail.sh", "echo 'mount offline' >&2\nexit 3");
    write_handler(dir.path(), "slow.sh", "exec sleep 5");
    write_handler(dir.path(), "touch.sh", "touch \"$1\"");
    dir
}

fn invocation(program: &str, args: &[&str]) -> WireRequest {
    WireRequest::Invocation(Invocation::new(
        program,
        args.iter().map(|arg| (*arg).to_owned()).collect(),
    ))
}

fn opened(dir: &TempDir) -> ProcessTransport {
    let mut transport = ProcessTransport::new(dir.path());
    transport.open().expect("open");
    transport
}

#[rstest]
fn process_returns_trimmed_stdout(handlers: TempDir) {
    let mut transport = opened(&handlers);
    let reply = transport
        .exchange(&invocation("echo.sh", &["05:30:00", "-12.5"]), Reply::Expected, LONG)
        .expect("handler runs");
    assert_eq!(reply.as_deref(), Some("05:30:00 -12.5"));
}

#[rstest]
fn process_runs_even_when_no_reply_is_expected(handlers: TempDir) {
    let marker = handlers.path().join("ran");
    let mut transport = opened(&handlers);
    let reply = transport
        .exchange(
            &invocation("touch.sh", &[marker.to_str().expect("utf-8 path")]),
            Reply::None,
            LONG,
        )
        .expect("handler runs");
    assert!(reply.is_none());
    assert!(marker.exists());
}

#[rstest]
fn process_non_zero_exit_carries_stderr(handlers: TempDir) {
    let mut transport = opened(&handlers);
    let error = transport
        .exchange(&invocation("fail.sh", &[]), Reply::Expected, LONG)
        .expect_err("handler fails");
    match error {
        TransportError::NonZeroExit { status, stderr, .. } => {
            assert_eq!(status, 3);
            assert_eq!(stderr, "mount offline");
        }
        other => panic!("expected NonZeroExit, got {other:?}"),
    }
}

#[rstest]
fn process_is_killed_after_timeout(handlers: TempDir) {
    let mut transport = opened(&handlers);
    let error = transport
        .exchange(
            &invocation("slow.sh", &[]),
            Reply::Expected,
            Duration::from_millis(100),
        )
        .expect_err("handler times out");
    assert!(matches!(error, TransportError::Timeout { timeout_ms: 100 }));
    assert!(error.is_transient());
}

#[rstest]
fn process_missing_handler_fails_to_spawn(handlers: TempDir) {
    let mut transport = opened(&handlers);
    let error = transport
        .exchange(&invocation("absent.sh", &[]), Reply::Expected, LONG)
        .expect_err("missing handler");
    assert!(matches!(error, TransportError::SpawnFailed { .. }));
    assert!(!error.is_transient());
}

#[rstest]
fn process_replaces_undecodable_output(handlers: TempDir) {
    write_handler(handlers.path(), "garbled.sh", "printf 'GS\\377'");
    let mut transport = opened(&handlers);
    let reply = transport
        .exchange(&invocation("garbled.sh", &[]), Reply::Expected, LONG)
        .expect("handler output is still read");
    assert_eq!(reply.as_deref(), Some("GS\u{fffd}"));
}

#[rstest]
fn process_rejects_protocol_frames(handlers: TempDir) {
    let mut transport = opened(&handlers);
    let error = transport.send(&frame("GS")).expect_err("unsupported");
    assert!(matches!(error, TransportError::Unsupported { .. }));
}

#[test]
fn process_requires_open() {
    let mut transport = ProcessTransport::new("/nonexistent");
    let error = transport
        .send(&invocation("park.py", &[]))
        .expect_err("not open");
    assert!(matches!(error, TransportError::NotOpen));
}
