//! DAP session state machine.
//!
//! The machine is pure bookkeeping: it never performs I/O and never
//! panics on an unexpected input. Invalid transitions are logged and
//! leave the state untouched unless the protocol says otherwise.

use crate::error::DapError;

/// The lifecycle phase of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Session has been created but no handshake was sent.
    #[default]
    None,
    /// The `initialize` request is in flight or answered, `initialized` not yet seen.
    Initializing,
    /// The adapter sent the `initialized` event.
    Initialized,
    /// The adapter ended the session.
    Terminated,
    /// The handshake or launch failed.
    Failed,
}

/// How a handshake response was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Successful response while initializing.
    Accepted,
    /// `success = false`; the session is now `Failed`.
    Rejected,
    /// Response arrived in the wrong state; the session was reset to `None`.
    Unexpected,
}

/// Session state plus the `launched` and `configured` flags.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    state: SessionState,
    launched: bool,
    configured: bool,
    /// The `initialize` response was accepted in this handshake.
    handshake_accepted: bool,
    /// `initialized` arrived before the `initialize` response.
    initialized_deferred: bool,
}

impl StateMachine {
    /// Create a machine in the [`None`](SessionState::None) state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn launched(&self) -> bool {
        self.launched
    }

    pub fn configured(&self) -> bool {
        self.configured
    }

    /// Transition: None → Initializing, when the handshake is submitted.
    pub fn begin_handshake(&mut self) -> Result<(), DapError> {
        match self.state {
            SessionState::None => {
                self.state = SessionState::Initializing;
                self.handshake_accepted = false;
                self.initialized_deferred = false;
                Ok(())
            }
            SessionState::Terminated => Err(DapError::Terminated),
            SessionState::Failed => Err(DapError::Failed),
            SessionState::Initializing | SessionState::Initialized => {
                Err(DapError::AlreadyStarted)
            }
        }
    }

    /// Undo [`begin_handshake`](Self::begin_handshake) when the request
    /// could not be written.
    pub fn abort_handshake(&mut self) {
        if self.state == SessionState::Initializing {
            self.state = SessionState::None;
        }
    }

    /// Apply the response to the `initialize` request.
    pub fn on_initialize_response(&mut self, success: bool) -> HandshakeOutcome {
        if self.state != SessionState::Initializing {
            tracing::warn!(
                "initialize response received in {:?} state, resetting session",
                self.state
            );
            self.state = SessionState::None;
            return HandshakeOutcome::Unexpected;
        }
        if success {
            self.handshake_accepted = true;
            HandshakeOutcome::Accepted
        } else {
            self.state = SessionState::Failed;
            HandshakeOutcome::Rejected
        }
    }

    /// Transition: Initializing → Initialized. Returns whether it happened.
    ///
    /// An event that beats the `initialize` response is held until
    /// [`take_deferred_initialized`](Self::take_deferred_initialized).
    pub fn on_initialized_event(&mut self) -> bool {
        if self.state != SessionState::Initializing {
            tracing::warn!(
                "initialized event received in {:?} state, ignoring",
                self.state
            );
            return false;
        }
        if !self.handshake_accepted {
            tracing::warn!("initialized event received before initialize response, deferring");
            self.initialized_deferred = true;
            return false;
        }
        self.state = SessionState::Initialized;
        true
    }

    /// Apply a deferred `initialized` event once the handshake is
    /// accepted. Returns whether the transition happened.
    pub fn take_deferred_initialized(&mut self) -> bool {
        if !std::mem::take(&mut self.initialized_deferred) {
            return false;
        }
        self.on_initialized_event()
    }

    /// Apply the response to the launch/attach request.
    pub fn on_launch_response(&mut self, success: bool) {
        if success {
            self.launched = true;
        } else {
            self.state = SessionState::Failed;
        }
    }

    /// Record a successful `configurationDone`.
    pub fn mark_configured(&mut self) {
        self.configured = true;
    }

    /// Transition: any → Terminated.
    pub fn on_terminated(&mut self) {
        self.state = SessionState::Terminated;
    }

    /// Whether the debuggee is fully up: initialized, launched, and
    /// configured when the adapter asks for `configurationDone`.
    pub fn is_running(&self, configuration_required: bool) -> bool {
        self.state == SessionState::Initialized
            && self.launched
            && (self.configured || !configuration_required)
    }

    /// Gate for execution-control and inspection commands.
    pub fn require_initialized(&self) -> Result<(), DapError> {
        match self.state {
            SessionState::Initialized => Ok(()),
            other => Err(Self::rejection(other)),
        }
    }

    /// Gate for `terminate` and `disconnect`.
    pub fn require_open(&self) -> Result<(), DapError> {
        match self.state {
            SessionState::Initializing | SessionState::Initialized => Ok(()),
            other => Err(Self::rejection(other)),
        }
    }

    fn rejection(state: SessionState) -> DapError {
        match state {
            SessionState::Terminated => DapError::Terminated,
            SessionState::Failed => DapError::Failed,
            _ => DapError::NotInitialized,
        }
    }
}
