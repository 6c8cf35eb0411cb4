//! Console subscriber: prints session notifications for the CLI.

use std::io::Write;
use std::sync::Arc;

use tether_dap::{
    BreakpointEvent, Capabilities, ContinuedEvent, ErrorMessage, ModuleEvent, Output,
    ProcessInfo, SessionState, StackTraceInfo, StoppedEvent, Subscriber, Thread, ThreadEvent,
};
use tokio::sync::mpsc;

/// Why the session loop should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The adapter ended the session.
    Terminated,
    /// The handshake or launch failed.
    Failed,
    /// The connection went away.
    Disconnected,
}

/// Prints notifications and reports the end of the session.
pub struct ConsoleSubscriber {
    done: mpsc::UnboundedSender<Outcome>,
}

impl ConsoleSubscriber {
    pub fn new(done: mpsc::UnboundedSender<Outcome>) -> Self {
        Self { done }
    }

    fn finish(&self, outcome: Outcome) {
        // The receiver is gone once the CLI has started shutting down.
        let _ = self.done.send(outcome);
    }
}

impl Subscriber for ConsoleSubscriber {
    fn capabilities_received(&self, capabilities: &Arc<Capabilities>) {
        tracing::info!(
            "adapter capabilities: configurationDone={}, terminate={}, stepBack={}",
            capabilities.supports_configuration_done_request,
            capabilities.supports_terminate_request,
            capabilities.supports_step_back
        );
    }

    fn launched(&self) {
        println!("[tether] debuggee launched");
    }

    fn output_produced(&self, output: &Output) {
        match output.category.as_deref() {
            Some("telemetry") => {}
            Some("stderr") => {
                let mut stderr = std::io::stderr().lock();
                let _ = stderr.write_all(output.output.as_bytes());
            }
            _ => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(output.output.as_bytes());
                let _ = stdout.flush();
            }
        }
    }

    fn debuggee_exited(&self, exit_code: i64) {
        println!("[tether] debuggee exited with code {}", exit_code);
    }

    fn debugging_process(&self, process: &ProcessInfo) {
        match process.system_process_id {
            Some(pid) => println!("[tether] debugging {} (pid {})", process.name, pid),
            None => println!("[tether] debugging {}", process.name),
        }
    }

    fn thread_changed(&self, event: &ThreadEvent) {
        tracing::debug!("thread {} {}", event.thread_id, event.reason);
    }

    fn debuggee_stopped(&self, event: &StoppedEvent) {
        let thread = event
            .thread_id
            .map(|id| format!(" on thread {}", id))
            .unwrap_or_default();
        let detail = event
            .description
            .as_deref()
            .or(event.text.as_deref())
            .map(|d| format!(": {}", d))
            .unwrap_or_default();
        println!("[tether] stopped ({}){}{}", event.reason, thread, detail);
    }

    fn module_changed(&self, event: &ModuleEvent) {
        tracing::debug!("module {} {}", event.module.name, event.reason);
    }

    fn debuggee_continued(&self, event: &ContinuedEvent) {
        if event.all_threads_continued {
            println!("[tether] continued");
        } else {
            println!("[tether] thread {} continued", event.thread_id);
        }
    }

    fn breakpoint_changed(&self, event: &BreakpointEvent) {
        let bp = &event.breakpoint;
        tracing::info!(
            "breakpoint {:?} {} (verified: {}, line: {:?})",
            bp.id,
            event.reason,
            bp.verified,
            bp.line
        );
    }

    fn error_response(&self, summary: &str, error: Option<&ErrorMessage>) {
        match error {
            Some(detail) if detail.show_user.unwrap_or(true) => {
                eprintln!("[tether] error: {} ({})", detail.render(), summary);
            }
            _ => eprintln!("[tether] error: {}", summary),
        }
    }

    fn server_disconnected(&self) {
        println!("[tether] debug adapter disconnected");
        self.finish(Outcome::Disconnected);
    }

    fn threads(&self, threads: &[Thread]) {
        for thread in threads {
            println!("[tether] thread {}: {}", thread.id, thread.name);
        }
    }

    fn stack_trace(&self, thread_id: i64, info: &StackTraceInfo) {
        println!("[tether] stack of thread {}:", thread_id);
        for frame in &info.stack_frames {
            let location = frame
                .source
                .as_ref()
                .and_then(|s| s.path.as_deref().or(s.name.as_deref()))
                .unwrap_or("<unknown>");
            println!("    #{} {} at {}:{}", frame.id, frame.name, location, frame.line);
        }
    }

    fn state_changed(&self, state: SessionState) {
        tracing::info!("session state: {:?}", state);
        match state {
            SessionState::Terminated => self.finish(Outcome::Terminated),
            SessionState::Failed => self.finish(Outcome::Failed),
            _ => {}
        }
    }
}
