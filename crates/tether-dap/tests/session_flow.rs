//! End-to-end session behaviour over an in-memory transport.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tether_dap::codec::{decode_message, encode_message};
use tether_dap::{
    Capabilities, ContinuedEvent, DapError, DapSession, ErrorMessage, LaunchRequest, Output,
    ReadCallback, ReadEvent, SessionOptions, SessionState, StackTraceInfo, StoppedEvent,
    Subscriber, Thread, Transport, TransportState,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockTransport {
    written: Mutex<Vec<Vec<u8>>>,
    callback: Mutex<Option<ReadCallback>>,
    state: Mutex<TransportState>,
    fail_writes: AtomicBool,
    short_writes: AtomicBool,
}

impl MockTransport {
    fn requests(&self) -> Vec<Value> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| decode_message(bytes).unwrap().unwrap().0)
            .collect()
    }

    fn last_request(&self) -> Value {
        self.requests().pop().unwrap()
    }

    fn feed(&self, bytes: &[u8]) {
        let mut callback = self.callback.lock().unwrap().take().unwrap();
        callback(ReadEvent::Data(bytes));
        *self.callback.lock().unwrap() = Some(callback);
    }

    fn deliver(&self, message: Value) {
        self.feed(&encode_message(&message).unwrap());
    }

    fn respond(&self, request_seq: i64, command: &str, success: bool, body: Value) {
        let mut message = json!({
            "seq": 100 + request_seq, "type": "response", "request_seq": request_seq,
            "command": command, "success": success,
        });
        if !body.is_null() {
            message["body"] = body;
        }
        self.deliver(message);
    }

    fn event(&self, event: &str, body: Value) {
        let mut message = json!({"seq": 500, "type": "event", "event": event});
        if !body.is_null() {
            message["body"] = body;
        }
        self.deliver(message);
    }

    fn hang_up(&self) {
        let mut callback = self.callback.lock().unwrap().take().unwrap();
        callback(ReadEvent::Closed);
        *self.callback.lock().unwrap() = Some(callback);
    }
}

impl Transport for MockTransport {
    fn start(&self) -> io::Result<()> {
        *self.state.lock().unwrap() = TransportState::Running;
        Ok(())
    }

    fn close(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let was_open = *state != TransportState::Closed;
        *state = TransportState::Closed;
        was_open
    }

    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "adapter went away"));
        }
        if self.short_writes.load(Ordering::SeqCst) {
            return Ok(bytes.len() / 2);
        }
        self.written.lock().unwrap().push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn start_async_read(&self, callback: ReadCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Note {
    Capabilities(bool),
    Launched,
    Output(String),
    Exited(i64),
    Stopped(String),
    Continued(ContinuedEvent),
    Error(String, Option<i64>),
    Disconnected,
    Threads(Vec<Thread>),
    StackTrace(i64, usize),
    State(SessionState),
}

#[derive(Default)]
struct Recorder {
    notes: Mutex<Vec<Note>>,
}

impl Recorder {
    fn notes(&self) -> Vec<Note> {
        self.notes.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Note) -> bool) -> usize {
        self.notes().iter().filter(|n| pred(n)).count()
    }

    fn push(&self, note: Note) {
        self.notes.lock().unwrap().push(note);
    }
}

impl Subscriber for Recorder {
    fn capabilities_received(&self, capabilities: &Arc<Capabilities>) {
        self.push(Note::Capabilities(
            capabilities.supports_configuration_done_request,
        ));
    }
    fn launched(&self) {
        self.push(Note::Launched);
    }
    fn output_produced(&self, output: &Output) {
        self.push(Note::Output(output.output.clone()));
    }
    fn debuggee_exited(&self, exit_code: i64) {
        self.push(Note::Exited(exit_code));
    }
    fn debuggee_stopped(&self, event: &StoppedEvent) {
        self.push(Note::Stopped(event.reason.clone()));
    }
    fn debuggee_continued(&self, event: &ContinuedEvent) {
        self.push(Note::Continued(event.clone()));
    }
    fn error_response(&self, summary: &str, error: Option<&ErrorMessage>) {
        self.push(Note::Error(summary.to_owned(), error.map(|e| e.id)));
    }
    fn server_disconnected(&self) {
        self.push(Note::Disconnected);
    }
    fn threads(&self, threads: &[Thread]) {
        self.push(Note::Threads(threads.to_vec()));
    }
    fn stack_trace(&self, thread_id: i64, info: &StackTraceInfo) {
        self.push(Note::StackTrace(thread_id, info.stack_frames.len()));
    }
    fn state_changed(&self, state: SessionState) {
        self.push(Note::State(state));
    }
}

struct Harness {
    session: DapSession,
    transport: Arc<MockTransport>,
    recorder: Arc<Recorder>,
}

fn launch_options() -> SessionOptions {
    SessionOptions {
        launch: Some(LaunchRequest {
            command: "launch".into(),
            arguments: json!({"program": "/tmp/app", "stopOnEntry": true}),
        }),
        ..SessionOptions::default()
    }
}

fn harness(options: SessionOptions) -> Harness {
    let transport = Arc::new(MockTransport::default());
    let session = DapSession::new(transport.clone(), options);
    let recorder = Arc::new(Recorder::default());
    session.subscribe(recorder.clone());
    session.start().unwrap();
    Harness {
        session,
        transport,
        recorder,
    }
}

/// Drive the handshake through launch: initialize(0), launch(1),
/// initialized, configurationDone(2).
fn running_session() -> Harness {
    let h = harness(launch_options());
    h.session.initialize().unwrap();
    h.transport.respond(
        0,
        "initialize",
        true,
        json!({"supportsConfigurationDoneRequest": true}),
    );
    h.transport.respond(1, "launch", true, Value::Null);
    h.transport.event("initialized", Value::Null);
    h.transport.respond(2, "configurationDone", true, Value::Null);
    assert!(h.session.is_running());
    h
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[test]
fn happy_path_handshake() {
    let h = harness(launch_options());

    assert_eq!(h.session.initialize().unwrap(), 0);
    let init = h.transport.last_request();
    assert_eq!(init["seq"], 0);
    assert_eq!(init["command"], "initialize");

    h.transport.respond(
        0,
        "initialize",
        true,
        json!({"supportsConfigurationDoneRequest": true}),
    );
    let launch = h.transport.last_request();
    assert_eq!(launch["seq"], 1);
    assert_eq!(launch["command"], "launch");
    assert_eq!(launch["arguments"]["program"], "/tmp/app");
    assert!(h.session.capabilities().unwrap().supports_configuration_done_request);

    h.transport.event("initialized", Value::Null);
    assert_eq!(h.session.state(), SessionState::Initialized);
    let config_done = h.transport.last_request();
    assert_eq!(config_done["seq"], 2);
    assert_eq!(config_done["command"], "configurationDone");
    assert_eq!(config_done["arguments"], json!({}));

    h.transport.respond(1, "launch", true, Value::Null);
    assert!(h.session.launched());
    assert!(!h.session.is_running());

    h.transport.respond(2, "configurationDone", true, Value::Null);
    assert!(h.session.configured());
    assert!(h.session.is_running());
    assert_eq!(h.session.pending_requests(), 0);

    assert_eq!(
        h.recorder.notes(),
        vec![
            Note::State(SessionState::Initializing),
            Note::Capabilities(true),
            Note::State(SessionState::Initialized),
            Note::Launched,
        ]
    );
}

#[test]
fn handshake_failure_marks_session_failed() {
    let h = harness(launch_options());
    h.session.initialize().unwrap();
    h.transport.deliver(json!({
        "seq": 1, "type": "response", "request_seq": 0, "command": "initialize",
        "success": false, "message": "unsupported client"
    }));

    assert_eq!(h.session.state(), SessionState::Failed);
    assert_eq!(h.transport.requests().len(), 1);
    assert!(h
        .recorder
        .notes()
        .contains(&Note::Error("unsupported client".into(), None)));
    assert!(matches!(h.session.threads(), Err(DapError::Failed)));
    assert!(matches!(h.session.initialize(), Err(DapError::Failed)));
}

#[test]
fn launch_failure_marks_session_failed() {
    let h = harness(launch_options());
    h.session.initialize().unwrap();
    h.transport.respond(0, "initialize", true, json!({}));
    h.transport.event("initialized", Value::Null);
    h.transport.deliver(json!({
        "seq": 9, "type": "response", "request_seq": 1, "command": "launch",
        "success": false, "message": "program not found",
        "body": {"error": {"id": 3000, "format": "program not found"}}
    }));

    assert_eq!(h.session.state(), SessionState::Failed);
    assert!(!h.session.launched());
    assert!(h
        .recorder
        .notes()
        .contains(&Note::Error("program not found".into(), Some(3000))));
}

#[test]
fn initialized_event_before_initialize_response_is_deferred() {
    let h = harness(launch_options());
    h.session.initialize().unwrap();
    h.transport.event("initialized", Value::Null);
    assert_eq!(h.session.state(), SessionState::Initializing);
    assert_eq!(h.transport.requests().len(), 1);

    h.transport.respond(
        0,
        "initialize",
        true,
        json!({"supportsConfigurationDoneRequest": true}),
    );
    assert_eq!(h.session.state(), SessionState::Initialized);
    assert!(h.session.capabilities().is_some());
    let commands: Vec<Value> = h
        .transport
        .requests()
        .iter()
        .map(|r| r["command"].clone())
        .collect();
    assert_eq!(commands, vec!["initialize", "launch", "configurationDone"]);

    h.transport.respond(1, "launch", true, Value::Null);
    h.transport.respond(2, "configurationDone", true, Value::Null);
    assert!(h.session.is_running());
    assert_eq!(
        h.recorder.notes(),
        vec![
            Note::State(SessionState::Initializing),
            Note::Capabilities(true),
            Note::State(SessionState::Initialized),
            Note::Launched,
        ]
    );
}

#[test]
fn initialized_event_without_handshake_stays_none() {
    let h = harness(SessionOptions::default());
    h.transport.event("initialized", Value::Null);
    assert_eq!(h.session.state(), SessionState::None);
    assert!(h.transport.requests().is_empty());
    assert!(h.recorder.notes().is_empty());
}

#[test]
fn initialized_then_launch_yields_initialized_and_launched() {
    let h = harness(launch_options());
    h.session.initialize().unwrap();
    h.transport.respond(0, "initialize", true, json!({}));
    h.transport.event("initialized", Value::Null);
    h.transport.respond(1, "launch", true, Value::Null);

    assert_eq!(h.session.state(), SessionState::Initialized);
    assert!(h.session.launched());
    // No configurationDone without the capability.
    assert_eq!(h.transport.requests().len(), 2);
    assert!(h.session.is_running());
}

#[test]
fn terminated_event_from_any_state() {
    let h = running_session();
    h.transport.event("terminated", Value::Null);
    assert_eq!(h.session.state(), SessionState::Terminated);
    assert!(matches!(h.session.cont(1, false), Err(DapError::Terminated)));
    assert!(matches!(h.session.disconnect(false), Err(DapError::Terminated)));
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn continue_scenario() {
    let h = running_session();
    let seq = h.session.cont(1, false).unwrap();
    assert_eq!(seq, 3);
    let req = h.transport.last_request();
    assert_eq!(req["command"], "continue");
    assert_eq!(req["arguments"], json!({"threadId": 1}));

    h.transport
        .respond(seq, "continue", true, json!({"allThreadsContinued": true}));
    assert_eq!(
        h.recorder.count(|n| matches!(n, Note::Continued(_))),
        1
    );
    assert!(h.recorder.notes().contains(&Note::Continued(ContinuedEvent {
        thread_id: 1,
        all_threads_continued: true,
    })));
}

#[test]
fn step_commands_report_continued() {
    let h = running_session();
    let next = h.session.next(4, true).unwrap();
    let step_in = h.session.step_into(4, false).unwrap();
    let step_out = h.session.step_out(4, false).unwrap();
    let goto = h.session.goto(4, 12).unwrap();
    let commands: Vec<Value> = h
        .transport
        .requests()
        .iter()
        .skip(3)
        .map(|r| r["command"].clone())
        .collect();
    assert_eq!(commands, vec!["next", "stepIn", "stepOut", "goto"]);
    assert_eq!(h.transport.last_request()["arguments"]["targetId"], 12);

    h.transport.respond(next, "next", true, Value::Null);
    h.transport.respond(step_in, "stepIn", true, Value::Null);
    h.transport.respond(step_out, "stepOut", true, Value::Null);
    h.transport.respond(goto, "goto", true, Value::Null);

    let continued: Vec<ContinuedEvent> = h
        .recorder
        .notes()
        .into_iter()
        .filter_map(|n| match n {
            Note::Continued(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(continued.len(), 4);
    assert!(continued.iter().all(|c| c.thread_id == 4));
    assert!(!continued[0].all_threads_continued);
    assert!(continued[1..].iter().all(|c| c.all_threads_continued));
}

#[test]
fn step_response_narrows_continued_threads() {
    let h = running_session();
    let next = h.session.next(4, false).unwrap();
    h.transport
        .respond(next, "next", true, json!({"allThreadsContinued": false}));

    let step_in = h.session.step_into(4, false).unwrap();
    h.transport
        .respond(step_in, "stepIn", true, json!({"singleThread": true}));

    let narrowed = ContinuedEvent {
        thread_id: 4,
        all_threads_continued: false,
    };
    assert_eq!(
        h.recorder.count(|n| *n == Note::Continued(narrowed.clone())),
        2
    );
}

#[test]
fn pause_and_terminate_have_no_success_notification() {
    let h = running_session();
    let before = h.recorder.notes().len();
    let pause = h.session.pause(1).unwrap();
    let terminate = h.session.terminate(true).unwrap();
    assert_eq!(h.transport.last_request()["arguments"], json!({"restart": true}));
    h.transport.respond(pause, "pause", true, Value::Null);
    h.transport.respond(terminate, "terminate", true, Value::Null);
    assert_eq!(h.recorder.notes().len(), before);
    assert_eq!(h.session.pending_requests(), 0);
}

#[test]
fn disconnect_success_reports_server_disconnected_once() {
    let h = running_session();
    let seq = h.session.disconnect(false).unwrap();
    h.transport.respond(seq, "disconnect", true, Value::Null);
    h.transport.hang_up();
    assert_eq!(h.recorder.count(|n| *n == Note::Disconnected), 1);
}

#[test]
fn threads_and_stack_trace_results() {
    let h = running_session();
    let threads = h.session.threads().unwrap();
    h.transport.respond(
        threads,
        "threads",
        true,
        json!({"threads": [{"id": 1, "name": "main"}, {"id": 2, "name": "worker"}]}),
    );
    let stack = h.session.stack_trace(2, 0, 20).unwrap();
    assert_eq!(
        h.transport.last_request()["arguments"],
        json!({"threadId": 2, "startFrame": 0, "levels": 20})
    );
    h.transport.respond(
        stack,
        "stackTrace",
        true,
        json!({"stackFrames": [
            {"id": 1, "name": "work", "line": 3, "column": 1},
            {"id": 2, "name": "main", "line": 9, "column": 1}
        ], "totalFrames": 2}),
    );

    let notes = h.recorder.notes();
    assert!(notes.contains(&Note::Threads(vec![
        Thread { id: 1, name: "main".into() },
        Thread { id: 2, name: "worker".into() },
    ])));
    assert!(notes.contains(&Note::StackTrace(2, 2)));
}

#[test]
fn failed_inspection_delivers_empty_results() {
    let h = running_session();
    let threads = h.session.threads().unwrap();
    let stack = h.session.stack_trace(5, 0, 0).unwrap();
    h.transport.respond(threads, "threads", false, Value::Null);
    h.transport.respond(stack, "stackTrace", false, Value::Null);

    let notes = h.recorder.notes();
    assert!(notes.contains(&Note::Threads(Vec::new())));
    assert!(notes.contains(&Note::StackTrace(5, 0)));
    assert_eq!(h.recorder.count(|n| matches!(n, Note::Error(..))), 2);
    assert_eq!(h.session.state(), SessionState::Initialized);
}

#[test]
fn failed_resume_only_reports_error() {
    let h = running_session();
    let seq = h.session.cont(1, false).unwrap();
    h.transport.respond(seq, "continue", false, Value::Null);
    assert_eq!(h.recorder.count(|n| matches!(n, Note::Continued(_))), 0);
    assert_eq!(h.recorder.count(|n| matches!(n, Note::Error(..))), 1);
    assert_eq!(h.session.state(), SessionState::Initialized);
}

#[test]
fn rejected_command_consumes_no_sequence() {
    let h = harness(SessionOptions::default());
    assert!(matches!(h.session.pause(1), Err(DapError::NotInitialized)));
    assert!(matches!(h.session.stack_trace(1, 0, 0), Err(DapError::NotInitialized)));
    assert_eq!(h.session.pending_requests(), 0);
    assert_eq!(h.session.initialize().unwrap(), 0);
}

#[test]
fn failed_write_reports_disconnect() {
    let h = running_session();
    h.transport.fail_writes.store(true, Ordering::SeqCst);
    assert!(matches!(h.session.threads(), Err(DapError::Io(_))));
    assert_eq!(h.session.pending_requests(), 0);
    assert_eq!(h.recorder.count(|n| *n == Note::Disconnected), 1);
}

#[test]
fn short_write_reports_disconnect() {
    let h = running_session();
    h.transport.short_writes.store(true, Ordering::SeqCst);
    assert!(matches!(h.session.threads(), Err(DapError::Transport(_))));
    assert!(matches!(h.session.pause(1), Err(DapError::Transport(_))));
    assert_eq!(h.session.pending_requests(), 0);
    assert_eq!(h.recorder.count(|n| *n == Note::Disconnected), 1);
}

// ---------------------------------------------------------------------------
// Routing robustness
// ---------------------------------------------------------------------------

#[test]
fn duplicate_response_dispatched_at_most_once() {
    let h = running_session();
    let seq = h.session.cont(1, false).unwrap();
    h.transport.respond(seq, "continue", true, Value::Null);
    h.transport.respond(seq, "continue", true, Value::Null);
    assert_eq!(h.recorder.count(|n| matches!(n, Note::Continued(_))), 1);
}

#[test]
fn unknown_response_is_ignored() {
    let h = running_session();
    let before = h.recorder.notes();
    h.transport.respond(999, "threads", true, json!({"threads": []}));
    h.transport.respond(-1, "threads", true, json!({"threads": []}));
    assert_eq!(h.recorder.notes(), before);
    assert_eq!(h.session.state(), SessionState::Initialized);
}

#[test]
fn mismatched_command_still_delivered() {
    let h = running_session();
    let seq = h.session.threads().unwrap();
    h.transport
        .respond(seq, "stackTrace", true, json!({"threads": [{"id": 1, "name": "t"}]}));
    assert_eq!(h.recorder.count(|n| matches!(n, Note::Threads(t) if t.len() == 1)), 1);
}

#[test]
fn garbage_and_unknown_events_do_not_disturb_session() {
    let h = running_session();
    h.transport.feed(b"Content-Length: 5\r\n\r\nnope!");
    h.transport.feed(b"Content-Length: abc\r\n\r\n");
    h.transport.deliver(json!({"type": "mystery"}));
    h.transport.event("loadedSource", json!({"reason": "new"}));
    h.transport.event("stopped", json!({"reason": "breakpoint", "threadId": 1}));
    assert_eq!(h.session.state(), SessionState::Initialized);
    assert!(h
        .recorder
        .notes()
        .contains(&Note::Stopped("breakpoint".into())));
}

#[test]
fn events_reach_subscribers() {
    let h = running_session();
    h.transport
        .event("output", json!({"category": "stdout", "output": "hello\n"}));
    h.transport.event("continued", json!({"threadId": 3}));
    h.transport.event("exited", json!({"exitCode": 7}));
    h.transport.event("exited", Value::Null);

    let notes = h.recorder.notes();
    assert!(notes.contains(&Note::Output("hello\n".into())));
    assert!(notes.contains(&Note::Continued(ContinuedEvent {
        thread_id: 3,
        all_threads_continued: true,
    })));
    assert!(notes.contains(&Note::Exited(7)));
    assert!(notes.contains(&Note::Exited(-1)));
}

#[test]
fn frames_split_across_reads() {
    let h = harness(SessionOptions::default());
    h.session.initialize().unwrap();
    let mut bytes = encode_message(&json!({
        "seq": 1, "type": "response", "request_seq": 0, "command": "initialize",
        "success": true, "body": {}
    }))
    .unwrap();
    bytes.extend(encode_message(&json!({"seq": 2, "type": "event", "event": "initialized"})).unwrap());

    for chunk in bytes.chunks(7) {
        h.transport.feed(chunk);
    }
    assert_eq!(h.session.state(), SessionState::Initialized);
    assert!(h.session.capabilities().is_some());
}

#[test]
fn panicking_subscriber_does_not_stop_delivery() {
    struct Exploder;
    impl Subscriber for Exploder {
        fn output_produced(&self, _output: &Output) {
            panic!("exploding subscriber");
        }
    }

    let transport = Arc::new(MockTransport::default());
    let session = DapSession::new(transport.clone(), SessionOptions::default());
    let recorder = Arc::new(Recorder::default());
    session.subscribe(Arc::new(Exploder));
    session.subscribe(recorder.clone());
    session.start().unwrap();

    transport.event("output", json!({"output": "one"}));
    transport.event("output", json!({"output": "two"}));
    assert_eq!(
        recorder.notes(),
        vec![Note::Output("one".into()), Note::Output("two".into())]
    );
}

#[test]
fn subscriber_can_issue_commands_from_callback() {
    struct AutoThreads {
        session: Mutex<Option<DapSession>>,
        issued: Mutex<Vec<i64>>,
    }
    impl Subscriber for AutoThreads {
        fn debuggee_stopped(&self, _event: &StoppedEvent) {
            if let Some(session) = self.session.lock().unwrap().as_ref() {
                self.issued.lock().unwrap().push(session.threads().unwrap());
            }
        }
    }

    let h = running_session();
    let auto = Arc::new(AutoThreads {
        session: Mutex::new(Some(h.session.clone())),
        issued: Mutex::new(Vec::new()),
    });
    h.session.subscribe(auto.clone());
    h.transport
        .event("stopped", json!({"reason": "step", "threadId": 1}));

    assert_eq!(*auto.issued.lock().unwrap(), vec![3]);
    assert_eq!(h.transport.last_request()["command"], "threads");

    // Break the session <-> subscriber cycle.
    auto.session.lock().unwrap().take();
}

#[test]
fn concurrent_commands_get_distinct_sequences() {
    let h = running_session();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = h.session.clone();
            std::thread::spawn(move || {
                (0..50)
                    .map(|_| session.pause(1).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seqs: Vec<i64> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 400);
    assert_eq!(seqs.first(), Some(&3));
    assert_eq!(seqs.last(), Some(&402));
    assert_eq!(h.session.pending_requests(), 400);
}
