//! Unit tests for the dispatch engine.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use strum::IntoEnumIterator;

use super::*;
use crate::error::ValidationError;
use crate::session::DispatchRecord;
use crate::tests::support::{MOUNT_TABLE, Script, ScriptedTransport, mount_table};

fn settings(slew_completion: SlewCompletion) -> DispatchSettings {
    DispatchSettings {
        timeout: Duration::from_millis(50),
        retry: RetryPolicy::exponential(2, Duration::from_millis(1), Duration::from_millis(4)),
        slew_completion,
    }
}

fn dispatcher(script: &Script) -> Dispatcher<ScriptedTransport> {
    Dispatcher::new(
        mount_table(),
        script.transport(),
        settings(SlewCompletion::ByFlag),
    )
}

fn timeout() -> TransportError {
    TransportError::Timeout { timeout_ms: 50 }
}

fn slew_args(asynchronous: bool) -> [Argument; 3] {
    [
        Argument::Float(5.5),
        Argument::Float(-12.5),
        Argument::Flag(asynchronous),
    ]
}

#[fixture]
fn script() -> Script {
    Script::new()
}

/// Connected and unparked.
fn idle(script: &Script) -> Dispatcher<ScriptedTransport> {
    let engine = dispatcher(script);
    script.reply("1").reply("1");
    engine.connect().expect("connect");
    engine.dispatch("unpark", &[]).expect("unpark");
    engine
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[rstest]
fn connect_opens_transport_and_session(script: Script) {
    let engine = dispatcher(&script);
    assert_eq!(engine.state().expect("state"), SessionState::Disconnected);
    assert!(engine.session_snapshot().expect("snapshot").is_none());

    script.reply("1");
    assert_eq!(engine.connect().expect("connect"), Value::Ack);

    assert_eq!(script.opened(), 1);
    assert_eq!(script.frames(), ["CN"]);
    assert_eq!(engine.state().expect("state"), SessionState::Connected);
    let snapshot = engine.session_snapshot().expect("snapshot").expect("open");
    assert_eq!(
        snapshot.last_dispatch.as_ref().map(DispatchRecord::action),
        Some("connect")
    );
}

#[rstest]
fn connecting_twice_is_rejected(script: Script) {
    let engine = idle(&script);
    let error = engine.connect().expect_err("already connected");
    assert!(matches!(
        error,
        DispatchError::InvalidState {
            state: SessionState::Idle,
            ..
        }
    ));
    assert_eq!(script.opened(), 1);
}

#[rstest]
fn actions_need_a_session(script: Script) {
    let engine = dispatcher(&script);
    let error = engine.dispatch("park", &[]).expect_err("disconnected");
    assert!(matches!(
        error,
        DispatchError::InvalidState {
            state: SessionState::Disconnected,
            ..
        }
    ));
    assert!(script.sent().is_empty());
}

#[rstest]
fn failed_greeting_closes_the_transport(script: Script) {
    let engine = dispatcher(&script);
    script.fail(TransportError::Unsupported {
        message: String::from("no greeting"),
    });

    let error = engine.connect().expect_err("greeting fails");
    assert!(matches!(error, DispatchError::Transport { attempts: 1, .. }));
    assert_eq!(script.closed(), 1);
    assert_eq!(engine.state().expect("state"), SessionState::Disconnected);
}

#[rstest]
fn disconnect_closes_transport_and_session(script: Script) {
    let engine = idle(&script);
    script.reply("1");

    assert_eq!(engine.disconnect().expect("disconnect"), Value::Ack);
    assert_eq!(script.closed(), 1);
    assert_eq!(script.frames().last().map(String::as_str), Some("DC"));
    assert_eq!(engine.state().expect("state"), SessionState::Disconnected);

    let frames = script.frames().len();
    assert_eq!(engine.disconnect().expect("idempotent"), Value::Ack);
    assert_eq!(script.frames().len(), frames);
}

#[rstest]
fn failed_disconnect_keeps_the_session(script: Script) {
    let engine = idle(&script);
    script.fail(TransportError::Unsupported {
        message: String::from("refused"),
    });

    engine.disconnect().expect_err("disconnect fails");
    assert_eq!(script.closed(), 0);
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
}

// ---------------------------------------------------------------------------
// Resolution and validation
// ---------------------------------------------------------------------------

#[rstest]
fn unknown_action_never_reaches_the_transport(script: Script) {
    let engine = idle(&script);
    let before = script.sent().len();

    let error = engine.dispatch("fly_to_moon", &[]).expect_err("unknown");
    assert!(matches!(error, DispatchError::NotFound { ref action } if action == "fly_to_moon"));
    assert_eq!(error.exit_status(), 1);
    assert_eq!(script.sent().len(), before);
}

#[rstest]
fn parked_mount_rejects_slew(script: Script) {
    let engine = idle(&script);
    script.reply("1");
    engine.dispatch("park", &[]).expect("park");
    assert_eq!(engine.state().expect("state"), SessionState::Parked);
    let before = script.sent().len();

    let error = engine
        .dispatch("slew_to_coordinates", &slew_args(false))
        .expect_err("parked");
    assert!(matches!(
        error,
        DispatchError::InvalidState {
            state: SessionState::Parked,
            ..
        }
    ));
    assert_eq!(script.sent().len(), before);
    assert_eq!(engine.state().expect("state"), SessionState::Parked);
}

#[rstest]
fn bad_arguments_are_rejected_before_sending(script: Script) {
    let engine = idle(&script);
    let before = script.sent().len();

    let error = engine
        .dispatch("slew_to_coordinates", &[Argument::Float(5.5)])
        .expect_err("arity");
    assert!(matches!(
        error,
        DispatchError::Validation {
            source: ValidationError::Arity {
                expected: 3,
                actual: 1
            },
            ..
        }
    ));
    assert_eq!(script.sent().len(), before);
}

#[rstest]
fn fixed_width_arguments_are_appended(script: Script) {
    let engine = idle(&script);
    let value = engine
        .dispatch("move_ms_north", &[Argument::Int(250)])
        .expect("pulse");
    assert_eq!(value, Value::Ack);
    assert_eq!(script.frames().last().map(String::as_str), Some("Mgn0250"));
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[rstest]
fn queries_retry_transient_failures(script: Script) {
    let engine = idle(&script);
    script.fail(timeout()).fail(timeout()).reply("Tracking");

    let value = engine.dispatch("get_status", &[]).expect("status");
    assert_eq!(value, Value::Text(String::from("Tracking")));
    let attempts = script.frames().iter().filter(|body| *body == "GS").count();
    assert_eq!(attempts, 3);
    assert_eq!(engine.state().expect("state"), SessionState::Tracking);
}

#[rstest]
fn exhausted_retries_report_attempts(script: Script) {
    let engine = idle(&script);
    script.fail(timeout()).fail(timeout()).fail(timeout());

    let error = engine.dispatch("get_status", &[]).expect_err("exhausted");
    assert!(matches!(error, DispatchError::Transport { attempts: 3, .. }));
    assert_eq!(error.exit_status(), 2);
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
}

#[test]
fn undecodable_handler_output_is_not_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = |name: &str, body: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write handler");
        std::fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o755))
            .expect("chmod handler");
    };
    handler("connect.sh", "echo 1");
    handler(
        "altitude.sh",
        "echo run >> \"$(dirname \"$0\")/runs\"\nprintf '4\\3772'",
    );
    let table = CommandTable::load(
        "connect:\n  file: connect.sh\n  response: 1\nget_altitude:\n  file: altitude.sh\n  response: float\n",
    )
    .expect("table loads");
    let engine = Dispatcher::new(
        table,
        crate::transport::ProcessTransport::new(dir.path()),
        DispatchSettings {
            timeout: Duration::from_secs(5),
            ..settings(SlewCompletion::ByFlag)
        },
    );
    engine.connect().expect("connect");

    let error = engine.dispatch("get_altitude", &[]).expect_err("garbled reply");
    assert!(matches!(error, DispatchError::Parse { .. }), "{error:?}");
    let runs = std::fs::read_to_string(dir.path().join("runs")).expect("handler ran");
    assert_eq!(runs.lines().count(), 1);
}

#[rstest]
fn motion_is_attempted_once(script: Script) {
    let engine = idle(&script);
    script.fail(timeout()).reply("1");

    let error = engine
        .dispatch("slew_to_coordinates", &slew_args(false))
        .expect_err("no retry");
    assert!(matches!(error, DispatchError::Transport { attempts: 1, .. }));
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
    let snapshot = engine.session_snapshot().expect("snapshot").expect("open");
    let record = snapshot.last_dispatch.expect("recorded");
    assert_eq!(record.action(), "slew_to_coordinates");
    assert!(!record.succeeded());
}

#[rstest]
fn idempotent_transports_retry_motion(script: Script) {
    script.set_idempotent();
    let engine = idle(&script);
    script.fail(timeout()).reply("1");

    engine
        .dispatch("slew_to_coordinates", &slew_args(false))
        .expect("retried");
    let slews = script
        .frames()
        .iter()
        .filter(|body| body.starts_with("MS"))
        .count();
    assert_eq!(slews, 2);
}

#[rstest]
#[case::first(0, 0)]
#[case::second(1, 100)]
#[case::third(2, 200)]
#[case::fourth(3, 400)]
#[case::capped(4, 500)]
#[case::overflow(40, 500)]
fn backoff_doubles_up_to_the_cap(#[case] retry: u32, #[case] expected_ms: u64) {
    let policy =
        RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(500));
    assert_eq!(policy.backoff(retry), Duration::from_millis(expected_ms));
}

#[rstest]
#[case("Acknowledge", SlewCompletion::Acknowledge)]
#[case("by_flag", SlewCompletion::ByFlag)]
#[case("POLL_STATUS", SlewCompletion::PollStatus)]
fn slew_completion_names_parse(#[case] text: &str, #[case] expected: SlewCompletion) {
    assert_eq!(text.parse::<SlewCompletion>(), Ok(expected));
}

#[test]
fn slew_completion_names_print_as_they_parse() {
    for mode in SlewCompletion::iter() {
        let name: &'static str = mode.into();
        assert_eq!(mode.to_string(), name);
        assert_eq!(name.parse::<SlewCompletion>(), Ok(mode));
    }
    assert!("eventually".parse::<SlewCompletion>().is_err());
}

// ---------------------------------------------------------------------------
// Responses and transitions
// ---------------------------------------------------------------------------

#[rstest]
fn unexpected_reply_leaves_state_unknown(script: Script) {
    let engine = idle(&script);
    script.reply("0");

    let error = engine.dispatch("park", &[]).expect_err("rejected");
    assert!(matches!(error, DispatchError::Parse { .. }));
    assert_eq!(engine.state().expect("state"), SessionState::Unknown);

    script.reply("parked");
    engine.dispatch("get_status", &[]).expect("status");
    assert_eq!(engine.state().expect("state"), SessionState::Parked);
}

#[rstest]
fn coordinates_are_remembered(script: Script) {
    let engine = idle(&script);
    script.reply("05:30:00 -12*30:00");

    let value = engine.dispatch("get_coordinates", &[]).expect("position");
    let Value::Tuple(parts) = &value else {
        panic!("expected a tuple, got {value:?}");
    };
    assert_eq!(parts.len(), 2);
    let snapshot = engine.session_snapshot().expect("snapshot").expect("open");
    assert_eq!(snapshot.last_position, Some(value));
}

#[rstest]
#[case::flag_async(SlewCompletion::ByFlag, true, SessionState::Slewing)]
#[case::flag_sync(SlewCompletion::ByFlag, false, SessionState::Idle)]
#[case::acknowledge(SlewCompletion::Acknowledge, true, SessionState::Idle)]
#[case::poll(SlewCompletion::PollStatus, false, SessionState::Slewing)]
fn slew_completion_modes(
    script: Script,
    #[case] mode: SlewCompletion,
    #[case] asynchronous: bool,
    #[case] expected: SessionState,
) {
    let engine = Dispatcher::new(mount_table(), script.transport(), settings(mode));
    script.reply("1").reply("1").reply("1");
    engine.connect().expect("connect");
    engine.dispatch("unpark", &[]).expect("unpark");

    engine
        .dispatch("slew_to_coordinates", &slew_args(asynchronous))
        .expect("slew");
    assert_eq!(engine.state().expect("state"), expected);
}

// ---------------------------------------------------------------------------
// Motion control
// ---------------------------------------------------------------------------

#[rstest]
fn cancel_motion_stops_a_slew(script: Script) {
    let engine = idle(&script);
    script.reply("1");
    engine
        .dispatch("slew_to_coordinates", &slew_args(true))
        .expect("slew");

    let stopped = engine.cancel_motion().expect("cancel");
    assert_eq!(stopped, Some(Value::Ack));
    assert_eq!(script.frames().last().map(String::as_str), Some("Q"));
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
}

#[rstest]
fn cancel_motion_finds_directional_stop(script: Script) {
    let engine = idle(&script);
    engine.dispatch("move_east", &[]).expect("move");
    assert_eq!(engine.state().expect("state"), SessionState::Moving);

    engine.cancel_motion().expect("cancel");
    assert_eq!(script.frames().last().map(String::as_str), Some("Qe"));
    assert_eq!(engine.state().expect("state"), SessionState::Idle);
}

#[rstest]
fn cancel_motion_is_a_no_op_when_still(script: Script) {
    let engine = idle(&script);
    let before = script.sent().len();
    assert_eq!(engine.cancel_motion().expect("cancel"), None);
    assert_eq!(script.sent().len(), before);
}

#[rstest]
fn wait_for_state_polls_status(script: Script) {
    let engine = idle(&script);
    script.reply("1");
    engine
        .dispatch("slew_to_coordinates", &slew_args(true))
        .expect("slew");
    script.reply("slewing").reply("slewing").reply("tracking");

    let reached = engine
        .wait_for_state(
            SessionState::Tracking,
            Duration::from_millis(1),
            Duration::from_secs(2),
        )
        .expect("arrives");
    assert_eq!(reached, SessionState::Tracking);
    let polls = script.frames().iter().filter(|body| *body == "GS").count();
    assert_eq!(polls, 3);
}

#[rstest]
fn wait_for_state_gives_up_at_the_deadline(script: Script) {
    let engine = idle(&script);
    for _ in 0..20 {
        script.reply("slewing");
    }

    let error = engine
        .wait_for_state(
            SessionState::Tracking,
            Duration::from_millis(5),
            Duration::from_millis(12),
        )
        .expect_err("expires");
    assert!(matches!(
        error,
        DispatchError::WaitExpired {
            target: SessionState::Tracking,
            state: SessionState::Slewing,
        }
    ));
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[rstest]
fn concurrent_dispatches_run_one_at_a_time_in_order(script: Script) {
    let engine = Arc::new(idle(&script));
    script.set_delay(Duration::from_millis(30));

    let handles: Vec<_> = (1..=4)
        .map(|pulse| {
            let worker = Arc::clone(&engine);
            let handle = thread::spawn(move || {
                worker.dispatch("move_ms_north", &[Argument::Int(pulse)])
            });
            thread::sleep(Duration::from_millis(10));
            handle
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker").expect("pulse");
    }

    assert_eq!(script.max_in_flight(), 1);
    let pulses: Vec<String> = script
        .frames()
        .into_iter()
        .filter(|body| body.starts_with("Mgn"))
        .collect();
    assert_eq!(pulses, ["Mgn0001", "Mgn0002", "Mgn0003", "Mgn0004"]);
}

#[rstest]
fn queued_dispatch_can_be_cancelled(script: Script) {
    let engine = Arc::new(idle(&script));
    script.set_delay(Duration::from_millis(200));
    script.reply("tracking");

    let first = {
        let worker = Arc::clone(&engine);
        thread::spawn(move || worker.dispatch("get_status", &[]))
    };
    wait_until("first dispatch to start", || script.in_flight() == 1);

    let token = CancelToken::new();
    let second = {
        let worker = Arc::clone(&engine);
        let cancel = token.clone();
        thread::spawn(move || worker.dispatch_cancellable("park", &[], &cancel))
    };
    wait_until("second dispatch to queue", || engine.queued() == 1);
    token.cancel();

    let cancelled = second.join().expect("worker").expect_err("cancelled");
    assert!(matches!(cancelled, DispatchError::Cancelled { ref action } if action == "park"));
    first.join().expect("worker").expect("status");
    assert_eq!(engine.queued(), 0);
    assert!(!script.frames().iter().any(|body| body == "hP"));
}

// ---------------------------------------------------------------------------
// Reload
// ---------------------------------------------------------------------------

#[rstest]
fn reload_applies_to_new_sessions(script: Script) {
    let engine = idle(&script);
    let extended = format!("{MOUNT_TABLE}get_firmware:\n  cmd: GVN\n  response: text\n");
    engine
        .reload(CommandTable::load(&extended).expect("extended table"))
        .expect("reload");
    assert!(engine.table().expect("table").get("get_firmware").is_some());

    let error = engine.dispatch("get_firmware", &[]).expect_err("old session");
    assert!(matches!(error, DispatchError::NotFound { .. }));

    script.reply("1").reply("1").reply("1.2.3");
    engine.disconnect().expect("disconnect");
    engine.connect().expect("reconnect");
    let version = engine.dispatch("get_firmware", &[]).expect("new session");
    assert_eq!(version, Value::Text(String::from("1.2.3")));
}
