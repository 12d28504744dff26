//! Supervision primitives shared by every supervised worker.
//!
//! A worker never decides on its own what a failure means. It hands the error
//! to a [`Classifier`], which maps it to a [`Directive`]; restarts are then
//! charged against the worker's [`SupervisionState`] so that a worker failing
//! too often inside its [`RestartBudget`] window is stopped instead of
//! restarted forever. Worker lifecycles are an explicit state machine
//! ([`WorkerState::next`]) so they can be checked without a running runtime.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_WINDOW_MS};
use crate::workers::error::WorkError;

/// What a supervisor wants done about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Discard the executor and run the request again on a fresh one.
    Restart,
    /// Give up on the request; the worker terminates.
    Stop,
    /// Let the parent decide.
    Escalate,
}

/// Pure mapping from a failure to a directive, evaluated fresh per failure.
pub type Classifier = fn(&WorkError) -> Directive;

/// Transient faults are retried, permanent ones stop the worker and anything
/// unknown goes to the parent.
pub fn default_classifier(error: &WorkError) -> Directive {
    match error {
        WorkError::Transient { .. } | WorkError::Sink { .. } => Directive::Restart,
        WorkError::Rejected { .. } | WorkError::RestartBudgetExceeded { .. } => Directive::Stop,
        WorkError::Unexpected { .. }
        | WorkError::ChannelError { .. }
        | WorkError::StartupFailed { .. } => Directive::Escalate,
    }
}

/// Restart on sink failures, stop on everything else.
pub fn sink_classifier(error: &WorkError) -> Directive {
    match error {
        WorkError::Sink { .. } => Directive::Restart,
        _ => Directive::Stop,
    }
}

/// At most `max_restarts` restarts within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartBudget {
    pub max_restarts: u32,
    pub window: Duration,
}

impl RestartBudget {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        RestartBudget {
            max_restarts,
            window,
        }
    }
}

impl Default for RestartBudget {
    fn default() -> Self {
        RestartBudget::new(
            DEFAULT_MAX_RESTARTS,
            Duration::from_millis(DEFAULT_RESTART_WINDOW_MS),
        )
    }
}

/// Restart bookkeeping owned by exactly one worker.
#[derive(Debug, Default)]
pub struct SupervisionState {
    attempts: u32,
    window_started: Option<Instant>,
    last_restart: Option<Instant>,
}

impl SupervisionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge one restart at `now` against `budget`.
    ///
    /// The counter resets once `now` falls outside the current window.
    /// Returns the attempt number within the window, or
    /// [`WorkError::RestartBudgetExceeded`] when the budget is spent.
    pub fn record_restart(&mut self, budget: &RestartBudget, now: Instant) -> Result<u32, WorkError> {
        let within_window = self
            .window_started
            .is_some_and(|started| now.saturating_duration_since(started) <= budget.window);
        if !within_window {
            self.window_started = Some(now);
            self.attempts = 0;
        }
        self.attempts = self.attempts.saturating_add(1);
        self.last_restart = Some(now);

        if self.attempts > budget.max_restarts {
            Err(WorkError::RestartBudgetExceeded {
                attempts: self.attempts,
                window: budget.window,
            })
        } else {
            Ok(self.attempts)
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_restart(&self) -> Option<Instant> {
        self.last_restart
    }
}

/// Lifecycle of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Executing,
    Restarting,
    Stopped,
}

/// Inputs driving [`WorkerState::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    Dispatched,
    Succeeded,
    Failed(Directive),
    Terminated,
}

impl WorkerState {
    /// Stopped is terminal; events that make no sense in a state leave it unchanged.
    pub fn next(self, event: WorkerEvent) -> WorkerState {
        match (self, event) {
            (WorkerState::Stopped, _) => WorkerState::Stopped,
            (_, WorkerEvent::Terminated) => WorkerState::Stopped,
            (WorkerState::Idle, WorkerEvent::Dispatched)
            | (WorkerState::Restarting, WorkerEvent::Dispatched) => WorkerState::Executing,
            (WorkerState::Executing, WorkerEvent::Succeeded) => WorkerState::Idle,
            (WorkerState::Executing, WorkerEvent::Failed(Directive::Restart)) => {
                WorkerState::Restarting
            }
            (WorkerState::Executing, WorkerEvent::Failed(_)) => WorkerState::Stopped,
            (state, _) => state,
        }
    }
}
