//! Task lifecycle state machine.
//!
//! [`Session`] is pure: it holds the current task, its history and retry
//! counters, and validates every state change against one transition table.
//! The async loop in `orchestrator` drives it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use super::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::actions::Action;
use crate::protocol::GlobalTaskState;
use crate::surface::{DriverError, SurfaceId};

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    Clarifying,
    Terminated,
    Error,
    Finished,
}

impl TaskState {
    /// Display text for status widgets.
    pub fn label(self) -> &'static str {
        match self {
            TaskState::Idle => "Idle",
            TaskState::Running => "Working...",
            TaskState::Clarifying => "Waiting for Input...",
            TaskState::Terminated => "Stopped",
            TaskState::Error => "Error",
            TaskState::Finished => "Complete!",
        }
    }

    /// A task is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Clarifying)
    }

    /// A task has ended but has not been cleaned up yet.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Terminated | TaskState::Error | TaskState::Finished
        )
    }

    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Finished)
                | (Running, Clarifying)
                | (Running, Error)
                | (Running, Terminated)
                | (Clarifying, Running)
                | (Clarifying, Terminated)
                | (Error, Idle)
                | (Finished, Idle)
                | (Terminated, Idle)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

/// Why a task was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcceptError {
    #[error("A task is already running")]
    Busy,
    #[error("Task instruction is empty")]
    EmptyInstruction,
    #[error("No target surface: {0}")]
    NoSurface(#[from] DriverError),
}

/// An accepted task. Immutable until cleanup drops it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub instruction: String,
    pub started_at: DateTime<Local>,
    pub started: Instant,
    pub surface: SurfaceId,
    pub max_duration: Duration,
}

impl Task {
    pub fn new(instruction: impl Into<String>, surface: SurfaceId, max_duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            started_at: Local::now(),
            started: Instant::now(),
            surface,
            max_duration,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.max_duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
}

/// One executed (or attempted) action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Chosen clarification label or captured value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActionRecord {
    pub fn success(action: Action) -> Self {
        Self {
            action,
            status: ActionStatus::Success,
            reason: None,
            detail: None,
        }
    }

    pub fn failed(action: Action, reason: String) -> Self {
        Self {
            action,
            status: ActionStatus::Failed,
            reason: Some(reason),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// State of the single task slot.
#[derive(Debug, Default)]
pub struct Session {
    state: TaskState,
    task: Option<Task>,
    history: Vec<ActionRecord>,
    retry: RetryState,
    policy: RetryPolicy,
    clipboard: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    /// The last `n` records, oldest first.
    pub fn recent_history(&self, n: usize) -> &[ActionRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn retry(&self) -> RetryState {
        self.retry
    }

    pub fn clipboard(&self) -> Option<&str> {
        self.clipboard.as_deref()
    }

    pub fn set_clipboard(&mut self, value: impl Into<String>) {
        self.clipboard = Some(value.into());
    }

    /// Whether `id` is the task currently in flight.
    pub fn is_current(&self, id: Uuid) -> bool {
        self.state.is_active() && self.task.as_ref().map(|t| t.id) == Some(id)
    }

    /// Move to `to` if the transition table allows it.
    pub fn transition(&mut self, to: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        tracing::debug!("Task state {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Accept a new task. Nothing changes when the slot is busy.
    pub fn accept(&mut self, task: Task, policy: RetryPolicy) -> Result<(), AcceptError> {
        if self.state != TaskState::Idle {
            return Err(AcceptError::Busy);
        }
        self.transition(TaskState::Running)
            .map_err(|_| AcceptError::Busy)?;
        self.task = Some(task);
        self.history.clear();
        self.policy = policy;
        self.retry = RetryState::new(policy.ceiling());
        Ok(())
    }

    /// Append a successful record and reset the failure counter.
    pub fn record_success(&mut self, record: ActionRecord) {
        self.history.push(record);
        self.retry.reset();
    }

    /// Append a failed record and consult the retry policy.
    ///
    /// On give-up the session moves to `Error`; the failed record stays in
    /// the history for the task report.
    pub fn record_failure(&mut self, record: ActionRecord) -> RetryDecision {
        self.history.push(record);
        self.register_failure()
    }

    /// Count a failure that produced no action (observation or decision).
    pub fn register_failure(&mut self) -> RetryDecision {
        let attempts = self.retry.register_failure();
        let decision = self.policy.decide(attempts);
        if decision == RetryDecision::GiveUp {
            if let Err(e) = self.transition(TaskState::Error) {
                tracing::warn!("{}", e);
            }
        }
        decision
    }

    /// Forget the task and return to `Idle`. Safe to call repeatedly.
    ///
    /// Returns the task that was dropped, if any.
    pub fn cleanup(&mut self) -> Option<Task> {
        if self.state.is_active() {
            tracing::warn!("Cleaning up a task that is still {:?}", self.state);
        }
        self.state = TaskState::Idle;
        self.history.clear();
        self.retry = RetryState::default();
        self.clipboard = None;
        self.task.take()
    }

    /// Snapshot of the shared cross-task state.
    pub fn global(&self) -> GlobalTaskState {
        match (&self.task, self.state.is_active()) {
            (Some(task), true) => GlobalTaskState {
                is_running: true,
                current_task: task.instruction.clone(),
                started_at: Some(task.started_at),
                surface: Some(task.surface.clone()),
            },
            _ => GlobalTaskState::default(),
        }
    }
}
