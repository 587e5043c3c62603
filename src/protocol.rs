//! Messages exchanged between the engine and its host.
//!
//! Transport is owned by the host: in-process callers use [`crate::Engine`]
//! directly, the bundled binary speaks JSON lines over stdio.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

use crate::actions::{Action, ClarifyOption};
use crate::agent::{ActionRecord, TaskState};
use crate::page::PageSnapshot;
use crate::settings::SettingsUpdate;
use crate::surface::{DriverCommand, SurfaceId};

/// Default capacity of the outbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Messages the engine accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    ExecuteTask {
        task: String,
        /// Target surface; the driver's active surface is used when absent.
        #[serde(default)]
        surface: Option<SurfaceId>,
    },
    Terminate {},
    UserChoice {
        choice: String,
    },
    PageSnapshotResult(PageSnapshot),
    CapturedData {
        value: String,
    },
    SettingsUpdate(SettingsUpdate),
    Ping {},
}

/// Messages the engine publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    StatusChanged {
        state: TaskState,
        label: String,
        #[serde(default)]
        message: Option<String>,
    },
    LogLine {
        text: String,
        timestamp: String,
    },
    PresentChoices {
        question: String,
        options: Vec<ClarifyOption>,
    },
    TaskResult {
        state: TaskState,
        text: String,
        history: Vec<ActionRecord>,
    },
    /// Ask the page observer for a fresh snapshot.
    RequestScan {
        surface: SurfaceId,
    },
    /// Hand an action to the page side (data capture).
    DispatchAction {
        surface: SurfaceId,
        action: Action,
    },
    Pong {
        state: TaskState,
        global: GlobalTaskState,
    },
    /// Low-level primitive for hosts that drive the surface themselves.
    DriverCommand {
        /// Echoed back in the matching `DriverReply`.
        id: u64,
        command: DriverCommand,
    },
}

/// Cross-task state readable by any listener.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTaskState {
    pub is_running: bool,
    pub current_task: String,
    pub started_at: Option<DateTime<Local>>,
    pub surface: Option<SurfaceId>,
}

/// Broadcast bus for outbound events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a human-readable log line.
    pub fn log(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{}", text);
        self.emit(EngineEvent::LogLine {
            text,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        });
    }

    pub fn status(&self, state: TaskState, message: Option<String>) {
        if let Some(ref message) = message {
            self.log(message.clone());
        }
        self.emit(EngineEvent::StatusChanged {
            state,
            label: state.label().to_string(),
            message,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

/// Single-slot request/response meeting point.
///
/// The requester calls [`Rendezvous::expect`] before publishing its request,
/// the responder calls [`Rendezvous::deliver`] when the answer arrives.
/// A newer `expect` supersedes an older one.
pub struct Rendezvous<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn expect(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some(tx);
        rx
    }

    /// Returns `false` when nobody was waiting.
    pub fn deliver(&self, value: T) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn cancel(&self) {
        self.slot.lock().take();
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}
