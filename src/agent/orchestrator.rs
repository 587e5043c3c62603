//! Task orchestrator: the observe, decide, act loop.
//!
//! An [`Engine`] owns the settings, the single task slot and the event bus.
//! Inbound messages are handled without waiting on the loop; each accepted
//! task runs in its own tokio task until it finishes, fails or is terminated.
//!
//! The slot stays taken until that tokio task has returned and released its
//! surface, so a new task never overlaps the tail of a terminated one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::clarify::{
    ClarificationCoordinator, ClarificationOutcome, DEFAULT_CLARIFICATION_TIMEOUT,
};
use super::retry::{RetryDecision, RetryPolicy};
use super::state::{AcceptError, ActionRecord, Session, Task, TaskState};
use crate::actions::{
    Action, ActionError, ActionExecutor, ActionKind, ActionOutcome, ClarifyOption, DEFAULT_NAVIGATION_TIMEOUT,
    DEFAULT_WAIT_DURATION,
};
use crate::model::{build_prompt, DecisionMaker, ModelConfig, PromptContext};
use crate::page::{
    ObserverError, ObserverGateway, PageSnapshot, DEFAULT_CAPTURE_TIMEOUT, DEFAULT_SCAN_TIMEOUT,
};
use crate::protocol::{EngineEvent, EventBus, GlobalTaskState, Inbound};
use crate::settings::{Settings, SettingsUpdate};
use crate::surface::{SurfaceDriver, SurfaceId, SurfaceInfo};

/// Page opened first when a task starts on a browser-internal page.
pub const BOOTSTRAP_URL: &str = "https://www.google.com";

/// Timing and sizing knobs of the loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lower bound of the delay between steps.
    pub step_delay_floor: Duration,
    /// Settle delay after a failed action.
    pub action_retry_delay: Duration,
    /// Settle delay after a failed observation or decision.
    pub error_retry_delay: Duration,
    pub clarification_timeout: Duration,
    pub scan_timeout: Duration,
    pub capture_timeout: Duration,
    pub navigation_timeout: Duration,
    pub wait_duration: Duration,
    /// Number of history records included in each prompt.
    pub history_window: usize,
    pub bootstrap_url: String,
    /// Where settings updates are persisted, if anywhere.
    pub settings_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_delay_floor: Duration::from_millis(500),
            action_retry_delay: Duration::from_secs(2),
            error_retry_delay: Duration::from_secs(3),
            clarification_timeout: DEFAULT_CLARIFICATION_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            wait_duration: DEFAULT_WAIT_DURATION,
            history_window: 10,
            bootstrap_url: BOOTSTRAP_URL.to_string(),
            settings_path: None,
        }
    }
}

impl EngineConfig {
    /// Set the retry settle delays.
    pub fn with_retry_delays(mut self, after_action: Duration, after_error: Duration) -> Self {
        self.action_retry_delay = after_action;
        self.error_retry_delay = after_error;
        self
    }

    pub fn with_clarification_timeout(mut self, timeout: Duration) -> Self {
        self.clarification_timeout = timeout;
        self
    }

    /// Set the snapshot and capture timeouts.
    pub fn with_observer_timeouts(mut self, scan: Duration, capture: Duration) -> Self {
        self.scan_timeout = scan;
        self.capture_timeout = capture;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Persist settings updates to `path`.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Delay between steps: `max(floor, 1500ms - speed * 200ms)`.
    pub fn step_delay(&self, speed: u8) -> Duration {
        let ms = 1500u64.saturating_sub(u64::from(speed) * 200);
        Duration::from_millis(ms).max(self.step_delay_floor)
    }
}

/// How a run of the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunEnd {
    Finished(String),
    Failed(String),
    /// The run is no longer current; someone else already reported it.
    Detached,
}

enum Step {
    Continue,
    Retry(Duration),
    Done(RunEnd),
}

/// The spawned loop of the current or most recent task.
struct RunSlot {
    id: Uuid,
    done: watch::Receiver<bool>,
}

struct Shared {
    session: Session,
    cancel: Option<CancellationToken>,
    run: Option<RunSlot>,
}

struct EngineInner {
    settings: RwLock<Settings>,
    shared: Mutex<Shared>,
    bus: EventBus,
    gateway: Arc<ObserverGateway>,
    executor: ActionExecutor,
    clarifier: ClarificationCoordinator,
    decider: Arc<dyn DecisionMaker>,
    driver: Arc<dyn SurfaceDriver>,
    config: EngineConfig,
}

/// The task orchestration engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with default timings and its own event bus.
    pub fn new(
        settings: Settings,
        decider: Arc<dyn DecisionMaker>,
        driver: Arc<dyn SurfaceDriver>,
    ) -> Self {
        Self::with_config(
            settings,
            decider,
            driver,
            EngineConfig::default(),
            EventBus::default(),
        )
    }

    /// Create an engine publishing on `bus`.
    ///
    /// Share the bus with drivers that talk to the host through it.
    pub fn with_config(
        settings: Settings,
        decider: Arc<dyn DecisionMaker>,
        driver: Arc<dyn SurfaceDriver>,
        config: EngineConfig,
        bus: EventBus,
    ) -> Self {
        let gateway = Arc::new(
            ObserverGateway::new(bus.clone())
                .with_timeouts(config.scan_timeout, config.capture_timeout),
        );
        let executor = ActionExecutor::new(driver.clone(), gateway.clone())
            .with_navigation_timeout(config.navigation_timeout)
            .with_wait_duration(config.wait_duration);
        let clarifier = ClarificationCoordinator::new(bus.clone())
            .with_timeout(config.clarification_timeout);

        Self {
            inner: Arc::new(EngineInner {
                settings: RwLock::new(settings),
                shared: Mutex::new(Shared {
                    session: Session::new(),
                    cancel: None,
                    run: None,
                }),
                bus,
                gateway,
                executor,
                clarifier,
                decider,
                driver,
                config,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn state(&self) -> TaskState {
        self.inner.shared.lock().session.state()
    }

    pub fn global(&self) -> GlobalTaskState {
        self.inner.shared.lock().session.global()
    }

    pub fn settings(&self) -> Settings {
        self.inner.settings.read().clone()
    }

    /// Handle one inbound message. Never waits for the task loop.
    pub async fn handle(&self, message: Inbound) {
        match message {
            Inbound::ExecuteTask { task, surface } => {
                if let Err(e) = self.execute_task(&task, surface).await {
                    tracing::warn!("Task rejected: {}", e);
                    self.inner.bus.log(format!("Task rejected: {}", e));
                }
            }
            Inbound::Terminate {} => {
                self.terminate().await;
            }
            Inbound::UserChoice { choice } => {
                self.user_choice(&choice);
            }
            Inbound::PageSnapshotResult(snapshot) => {
                if !self.inner.gateway.deliver_snapshot(snapshot) {
                    tracing::debug!("Dropping page snapshot nobody asked for");
                }
            }
            Inbound::CapturedData { value } => self.captured_data(value),
            Inbound::SettingsUpdate(update) => self.update_settings(update),
            Inbound::Ping {} => {
                let (state, global) = {
                    let shared = self.inner.shared.lock();
                    (shared.session.state(), shared.session.global())
                };
                self.inner.bus.emit(EngineEvent::Pong { state, global });
            }
        }
    }

    /// Accept a task and start its loop.
    ///
    /// # Arguments
    /// * `instruction` - Natural-language task.
    /// * `surface` - Target surface; the driver's active surface when `None`.
    ///
    /// # Returns
    /// The id of the accepted task.
    pub async fn execute_task(
        &self,
        instruction: &str,
        surface: Option<SurfaceId>,
    ) -> Result<Uuid, AcceptError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(AcceptError::EmptyInstruction);
        }
        if self.is_busy() {
            return Err(AcceptError::Busy);
        }

        let info = self.resolve_surface(surface).await?;
        let settings = self.settings();
        let policy = RetryPolicy::new(settings.retry_strategy, settings.smart_recovery);
        let task = Task::new(instruction, info.id.clone(), settings.task_duration());
        let id = task.id;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut shared = self.inner.shared.lock();
            if shared.run.is_some() {
                return Err(AcceptError::Busy);
            }
            shared.session.accept(task.clone(), policy)?;
            shared.cancel = Some(cancel.clone());
            shared.run = Some(RunSlot { id, done: done_rx });
        }
        self.inner
            .bus
            .status(TaskState::Running, Some(format!("Starting task: {}", instruction)));

        let engine = self.clone();
        tokio::spawn(async move {
            let end = engine.drive(&task, &info, &settings, &cancel).await;
            match end {
                RunEnd::Finished(text) => {
                    engine.close_task(TaskState::Finished, text, Some(id));
                }
                RunEnd::Failed(text) => {
                    engine.close_task(TaskState::Error, text, Some(id));
                }
                RunEnd::Detached => {
                    tracing::debug!("Run {} ended after it was detached", id);
                }
            }
            engine.end_run(&task).await;
            let _ = done_tx.send(true);
        });

        Ok(id)
    }

    /// Stop the running task. Returns `false` when nothing was running.
    ///
    /// Returns once the stopped run has wound down and released its surface.
    pub async fn terminate(&self) -> bool {
        let stopped = self.close_task(
            TaskState::Terminated,
            "Task stopped by user".to_string(),
            None,
        );
        if !stopped {
            self.inner.bus.log("No task is running");
        }
        self.wait_idle().await;
        stopped
    }

    /// Wait until the most recent run has returned and released its surface.
    pub async fn wait_idle(&self) {
        let done = self.inner.shared.lock().run.as_ref().map(|r| r.done.clone());
        if let Some(mut done) = done {
            // An error means the run was dropped, which also ends it.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Answer an open clarification. Returns `false` when none is open.
    pub fn user_choice(&self, choice: &str) -> bool {
        self.inner.clarifier.resolve(choice)
    }

    /// Store data captured by the page side.
    ///
    /// Completes an outstanding capture; outside a task the value is only
    /// kept for a later paste.
    pub fn captured_data(&self, value: String) {
        let active = {
            let mut shared = self.inner.shared.lock();
            shared.session.set_clipboard(value.clone());
            shared.session.state().is_active()
        };
        let preview: String = value.chars().take(100).collect();
        self.inner.bus.log(format!("Captured data: {}", preview));

        if !self.inner.gateway.deliver_capture(value) && active {
            tracing::debug!("Captured data arrived with no capture outstanding");
        }
    }

    /// Merge a settings update. A running task keeps its snapshot.
    pub fn update_settings(&self, update: SettingsUpdate) {
        let settings = {
            let mut settings = self.inner.settings.write();
            settings.apply(update);
            settings.clone()
        };
        let policy = RetryPolicy::new(settings.retry_strategy, settings.smart_recovery);
        self.inner
            .bus
            .log(format!("Retry limit set to: {}", policy.ceiling()));

        if let Some(ref path) = self.inner.config.settings_path {
            if let Err(e) = settings.save_to(path) {
                tracing::warn!("Failed to save settings: {}", e);
            }
        }
    }

    async fn resolve_surface(&self, surface: Option<SurfaceId>) -> Result<SurfaceInfo, AcceptError> {
        match surface {
            None => Ok(self.inner.driver.active_surface().await?),
            // The active surface is the only one whose location the driver reports.
            Some(id) => match self.inner.driver.active_surface().await {
                Ok(info) if info.id == id => Ok(info),
                _ => Ok(SurfaceInfo::new(id)),
            },
        }
    }

    fn is_current(&self, id: Uuid) -> bool {
        self.inner.shared.lock().session.is_current(id)
    }

    fn is_busy(&self) -> bool {
        let shared = self.inner.shared.lock();
        shared.session.state() != TaskState::Idle || shared.run.is_some()
    }

    /// Last step of every run: give up the surface, then free the slot.
    async fn end_run(&self, task: &Task) {
        if let Err(e) = self.inner.driver.release(&task.surface).await {
            tracing::debug!("Failed to release {}: {}", task.surface, e);
        }
        let mut shared = self.inner.shared.lock();
        if shared.run.as_ref().map(|r| r.id) == Some(task.id) {
            shared.run = None;
        }
    }

    /// Report and clean up a task.
    ///
    /// With `only` set, the task is closed only if it is still that task;
    /// otherwise any active task is closed. The run releases the surface
    /// itself once it has returned.
    fn close_task(&self, target: TaskState, text: String, only: Option<Uuid>) -> bool {
        let history = {
            let mut shared = self.inner.shared.lock();
            let session = &mut shared.session;
            match only {
                Some(id) if session.task().map(|t| t.id) != Some(id) => return false,
                None if !session.state().is_active() => return false,
                _ => {}
            }
            if session.state() != target {
                if let Err(e) = session.transition(target) {
                    tracing::warn!("{}", e);
                    return false;
                }
            }
            let history = session.history().to_vec();
            session.cleanup();
            if let Some(cancel) = shared.cancel.take() {
                cancel.cancel();
            }
            history
        };

        self.inner.gateway.reset();
        self.inner.clarifier.cancel();

        let bus = &self.inner.bus;
        bus.status(target, Some(text.clone()));
        bus.emit(EngineEvent::TaskResult {
            state: target,
            text,
            history,
        });
        bus.status(TaskState::Idle, None);
        true
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn drive(
        &self,
        task: &Task,
        info: &SurfaceInfo,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> RunEnd {
        let bus = &self.inner.bus;
        let config = &self.inner.config;

        if !settings.is_configured() {
            return RunEnd::Failed(
                "API settings are not fully configured. Set the endpoint, API key and model first."
                    .to_string(),
            );
        }

        let policy = RetryPolicy::new(settings.retry_strategy, settings.smart_recovery);
        bus.log(format!("Task: {}", task.instruction));
        bus.log(format!(
            "Duration limit: {} minutes",
            settings.task_duration_minutes
        ));
        bus.log(format!("Execution speed: {}/5", settings.speed()));
        bus.log(format!(
            "Retry strategy: {} (limit {})",
            settings.retry_strategy,
            policy.ceiling()
        ));

        if info.is_system_page() {
            bus.log(format!(
                "Surface shows a browser page that cannot be read, opening {}",
                config.bootstrap_url
            ));
            let action = Action::new(ActionKind::Navigate {
                url: config.bootstrap_url.clone(),
            });
            match self
                .inner
                .executor
                .execute(&task.surface, &action, &PageSnapshot::default(), None, cancel)
                .await
            {
                Ok(_) => {}
                Err(ActionError::Cancelled) => return RunEnd::Detached,
                Err(e) => tracing::warn!("Bootstrap navigation failed: {}", e),
            }
        }

        let model_config = ModelConfig::from_settings(settings);
        let step_delay = config.step_delay(settings.speed());

        loop {
            if cancel.is_cancelled() || !self.is_current(task.id) {
                return RunEnd::Detached;
            }
            if task.is_expired() {
                return RunEnd::Finished(timeout_message(task));
            }

            let delay = match self.step(task, &model_config, cancel).await {
                Step::Continue => step_delay,
                Step::Retry(delay) => delay,
                Step::Done(end) => return end,
            };
            if !self.pause(delay, cancel).await {
                return RunEnd::Detached;
            }
        }
    }

    async fn step(&self, task: &Task, model_config: &ModelConfig, cancel: &CancellationToken) -> Step {
        let config = &self.inner.config;

        let snapshot = match self
            .inner
            .gateway
            .request_snapshot(&task.surface, cancel)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(ObserverError::Cancelled) => return Step::Done(RunEnd::Detached),
            Err(e) => {
                return self.on_failure(task.id, None, e.to_string(), config.error_retry_delay)
            }
        };

        let (prompt, clipboard) = {
            let shared = self.inner.shared.lock();
            let session = &shared.session;
            if !session.is_current(task.id) {
                return Step::Done(RunEnd::Detached);
            }
            let retry = session.retry();
            let ctx = PromptContext {
                task: &task.instruction,
                elapsed: task.elapsed(),
                max_duration: task.max_duration,
                attempts: retry.attempts(),
                ceiling: retry.ceiling(),
                execution_speed: model_config.execution_speed,
                history: session.recent_history(config.history_window),
                snapshot: &snapshot,
                clipboard: session.clipboard(),
            };
            (
                build_prompt(&ctx),
                session.clipboard().map(str::to_string),
            )
        };

        // Dropping the call on cancellation aborts the request.
        let decision = tokio::select! {
            _ = cancel.cancelled() => return Step::Done(RunEnd::Detached),
            decision = self.inner.decider.decide(model_config, &prompt) => decision,
        };
        if !self.is_current(task.id) {
            tracing::info!("Discarding decision for task {}: no longer current", task.id);
            return Step::Done(RunEnd::Detached);
        }
        if task.is_expired() {
            return Step::Done(RunEnd::Finished(timeout_message(task)));
        }

        let action = match decision {
            Ok(action) => action,
            Err(e) => {
                return self.on_failure(
                    task.id,
                    None,
                    format!("Decision failed: {}", e),
                    config.error_retry_delay,
                )
            }
        };

        let description = action.describe();
        if description.is_empty() {
            self.inner.bus.log(format!("Action: {}", action.kind_name()));
        } else {
            self.inner
                .bus
                .log(format!("Action: {} - {}", action.kind_name(), description));
        }

        match &action.kind {
            ActionKind::Finish => {
                let text = action
                    .message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Task completed".to_string());
                return Step::Done(RunEnd::Finished(text));
            }
            ActionKind::Clarify { question, options } => {
                return self.clarify(task, &action, question, options, cancel).await;
            }
            _ => {}
        }

        match self
            .inner
            .executor
            .execute(&task.surface, &action, &snapshot, clipboard.as_deref(), cancel)
            .await
        {
            Ok(ActionOutcome::Completed) => {
                self.record_success(task.id, ActionRecord::success(action));
                Step::Continue
            }
            Ok(ActionOutcome::AwaitingCapture(pending)) => match pending.wait(cancel).await {
                Ok(value) => {
                    self.record_success(task.id, ActionRecord::success(action).with_detail(value));
                    Step::Continue
                }
                Err(ObserverError::Cancelled) => Step::Done(RunEnd::Detached),
                Err(e) => self.on_failure(
                    task.id,
                    Some(action),
                    e.to_string(),
                    config.action_retry_delay,
                ),
            },
            Err(ActionError::Cancelled) => Step::Done(RunEnd::Detached),
            Err(e) => self.on_failure(
                task.id,
                Some(action),
                e.to_string(),
                config.action_retry_delay,
            ),
        }
    }

    async fn clarify(
        &self,
        task: &Task,
        action: &Action,
        question: &str,
        options: &[ClarifyOption],
        cancel: &CancellationToken,
    ) -> Step {
        // The question is open before anyone can observe `Clarifying`.
        let wait = {
            let mut shared = self.inner.shared.lock();
            if !shared.session.is_current(task.id) {
                return Step::Done(RunEnd::Detached);
            }
            if let Err(e) = shared.session.transition(TaskState::Clarifying) {
                tracing::warn!("{}", e);
                return Step::Done(RunEnd::Detached);
            }
            self.inner.clarifier.begin(question, options)
        };
        self.inner
            .bus
            .status(TaskState::Clarifying, Some(format!("Question: {}", question)));

        let label = match wait.wait(cancel).await {
            ClarificationOutcome::Chosen(label) => {
                self.inner.bus.log(format!("User chose: {}", label));
                label
            }
            ClarificationOutcome::TimedOut(label) => {
                self.inner.clarifier.cancel();
                self.inner.bus.log(format!(
                    "No response within {}s, using the first option: {}",
                    self.inner.config.clarification_timeout.as_secs(),
                    label
                ));
                label
            }
            ClarificationOutcome::Cancelled => return Step::Done(RunEnd::Detached),
        };

        {
            let mut shared = self.inner.shared.lock();
            if !shared.session.is_current(task.id) {
                return Step::Done(RunEnd::Detached);
            }
            if let Err(e) = shared.session.transition(TaskState::Running) {
                tracing::warn!("{}", e);
                return Step::Done(RunEnd::Detached);
            }
            shared
                .session
                .record_success(ActionRecord::success(action.clone()).with_detail(label));
        }
        self.inner.bus.status(TaskState::Running, None);
        Step::Continue
    }

    fn record_success(&self, id: Uuid, record: ActionRecord) {
        let mut shared = self.inner.shared.lock();
        if shared.session.is_current(id) {
            shared.session.record_success(record);
        }
    }

    fn on_failure(
        &self,
        id: Uuid,
        action: Option<Action>,
        reason: String,
        delay: Duration,
    ) -> Step {
        let (decision, attempts, ceiling) = {
            let mut shared = self.inner.shared.lock();
            let session = &mut shared.session;
            if !session.is_current(id) {
                return Step::Done(RunEnd::Detached);
            }
            let decision = match action {
                Some(action) => session.record_failure(ActionRecord::failed(action, reason.clone())),
                None => session.register_failure(),
            };
            let retry = session.retry();
            (decision, retry.attempts(), retry.ceiling())
        };

        match decision {
            RetryDecision::Retry => {
                tracing::warn!("Step failed: {}", reason);
                self.inner.bus.log(format!(
                    "{} - retrying ({}/{})",
                    reason, attempts, ceiling
                ));
                Step::Retry(delay)
            }
            RetryDecision::GiveUp => Step::Done(RunEnd::Failed(format!(
                "Giving up after {} failed attempt(s): {}",
                attempts, reason
            ))),
        }
    }
}

fn timeout_message(task: &Task) -> String {
    format!(
        "Time limit of {}s reached. Task stopped.",
        task.max_duration.as_secs()
    )
}
