//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::actions::{Action, ActionKind};
use crate::agent::{Engine, TaskState};
use crate::model::{DecisionMaker, ModelConfig, ModelError, Prompt};
use crate::page::PageSnapshot;
use crate::protocol::{EngineEvent, Inbound};
use crate::surface::{DriverError, Point, SurfaceDriver, SurfaceId, SurfaceInfo};

/// Driver that records every primitive as a short string.
pub struct RecordingDriver {
    calls: Mutex<Vec<String>>,
    navigation_delay: Mutex<Duration>,
    key_delay: Mutex<Duration>,
    click_failure: Mutex<Option<String>>,
    active: Mutex<SurfaceInfo>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            navigation_delay: Mutex::new(Duration::ZERO),
            key_delay: Mutex::new(Duration::ZERO),
            click_failure: Mutex::new(None),
            active: Mutex::new(
                SurfaceInfo::new(SurfaceId::new("tab-1")).with_url("https://example.com"),
            ),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Make `navigate` take this long to report completion.
    pub fn set_navigation_delay(&self, delay: Duration) {
        *self.navigation_delay.lock() = delay;
    }

    /// Make every `key_press` take this long.
    pub fn set_key_delay(&self, delay: Duration) {
        *self.key_delay.lock() = delay;
    }

    pub fn fail_next_click(&self, message: &str) {
        *self.click_failure.lock() = Some(message.to_string());
    }

    pub fn set_active(&self, info: SurfaceInfo) {
        *self.active.lock() = info;
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl SurfaceDriver for RecordingDriver {
    async fn active_surface(&self) -> Result<SurfaceInfo, DriverError> {
        Ok(self.active.lock().clone())
    }

    async fn navigate(&self, _surface: &SurfaceId, url: &str) -> Result<(), DriverError> {
        self.record(format!("navigate {}", url));
        let delay = *self.navigation_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(())
    }

    async fn attach(&self, _surface: &SurfaceId) -> Result<(), DriverError> {
        self.record("attach".to_string());
        Ok(())
    }

    async fn detach(&self, _surface: &SurfaceId) -> Result<(), DriverError> {
        self.record("detach".to_string());
        Ok(())
    }

    async fn click(&self, _surface: &SurfaceId, point: Point) -> Result<(), DriverError> {
        if let Some(message) = self.click_failure.lock().take() {
            return Err(DriverError::CommandFailed(message));
        }
        self.record(format!("click {},{}", point.x, point.y));
        Ok(())
    }

    async fn key_press(&self, _surface: &SurfaceId, ch: char) -> Result<(), DriverError> {
        self.record(format!("key {}", ch));
        let delay = *self.key_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(())
    }

    async fn insert_text(&self, _surface: &SurfaceId, text: &str) -> Result<(), DriverError> {
        self.record(format!("insert {}", text));
        Ok(())
    }

    async fn scroll_by(&self, _surface: &SurfaceId, dy: i64) -> Result<(), DriverError> {
        self.record(format!("scroll {}", dy));
        Ok(())
    }

    async fn release(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.record(format!("release {}", surface));
        Ok(())
    }
}

/// Decision maker that replays a fixed script and records its prompts.
///
/// Once the script runs out it answers `finish`.
pub struct ScriptedDecider {
    script: Mutex<VecDeque<Result<Action, ModelError>>>,
    prompts: Mutex<Vec<Prompt>>,
    delay: Mutex<Duration>,
}

impl ScriptedDecider {
    pub fn new(script: Vec<Result<Action, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Delay every answer by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecider {
    async fn decide(&self, _config: &ModelConfig, prompt: &Prompt) -> Result<Action, ModelError> {
        self.prompts.lock().push(prompt.clone());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| {
            Ok(Action::new(ActionKind::Finish).with_message("Script exhausted"))
        })
    }
}

/// Play the host side: answer every scan with `snapshot` and every capture
/// with `capture`, when given.
pub fn spawn_fake_host(
    engine: &Engine,
    snapshot: PageSnapshot,
    capture: Option<String>,
) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    let engine = engine.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::RequestScan { .. }) => {
                    engine
                        .handle(Inbound::PageSnapshotResult(snapshot.clone()))
                        .await;
                }
                Ok(EngineEvent::DispatchAction { .. }) => {
                    if let Some(ref value) = capture {
                        engine
                            .handle(Inbound::CapturedData {
                                value: value.clone(),
                            })
                            .await;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Collect events up to the `Idle` status that follows a task report.
pub async fn collect_until_result(
    events: &mut broadcast::Receiver<EngineEvent>,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    let mut reported = false;
    loop {
        match events.recv().await {
            Ok(event) => {
                let done = reported
                    && matches!(
                        event,
                        EngineEvent::StatusChanged {
                            state: TaskState::Idle,
                            ..
                        }
                    );
                if matches!(event, EngineEvent::TaskResult { .. }) {
                    reported = true;
                }
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return seen,
        }
    }
}
