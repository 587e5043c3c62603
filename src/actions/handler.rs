//! Action executor: turns one [`Action`] into effects on a surface.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::action::{Action, ActionKind, ScrollDirection};
use crate::page::{ObserverGateway, PageSnapshot, PendingCapture};
use crate::surface::{DriverError, SurfaceDriver, SurfaceId};

/// Default bound on waiting for a navigation to finish loading.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause for a `wait` action.
pub const DEFAULT_WAIT_DURATION: Duration = Duration::from_secs(1);

/// Pause between resolving a target and pressing it, for running animations.
const POINTER_SETTLE: Duration = Duration::from_millis(100);

/// Action executor errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Element not found or not visible: {0}")]
    ElementNotFound(String),
    #[error("Clipboard is empty")]
    EmptyClipboard,
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("Action cancelled")]
    Cancelled,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// How an executed action ended.
#[derive(Debug)]
pub enum ActionOutcome {
    /// All effects have been applied.
    Completed,
    /// The action was handed to the page side; the value arrives later.
    AwaitingCapture(PendingCapture),
}

/// Executes actions against a target surface.
///
/// Knows nothing about tasks or retries: one call, one action, one outcome.
pub struct ActionExecutor {
    driver: Arc<dyn SurfaceDriver>,
    gateway: Arc<ObserverGateway>,
    navigation_timeout: Duration,
    wait_duration: Duration,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn SurfaceDriver>, gateway: Arc<ObserverGateway>) -> Self {
        Self {
            driver,
            gateway,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            wait_duration: DEFAULT_WAIT_DURATION,
        }
    }

    /// Set the navigation load timeout.
    pub fn with_navigation_timeout(mut self, navigation_timeout: Duration) -> Self {
        self.navigation_timeout = navigation_timeout;
        self
    }

    /// Set the pause used by `wait`.
    pub fn with_wait_duration(mut self, wait_duration: Duration) -> Self {
        self.wait_duration = wait_duration;
        self
    }

    /// Execute one action.
    ///
    /// # Arguments
    /// * `surface` - Target surface.
    /// * `action` - The validated action.
    /// * `snapshot` - Snapshot the action was decided on; locators resolve here.
    /// * `clipboard` - Previously captured data, if any.
    /// * `cancel` - Stops the action between primitives. The control channel
    ///   is still released.
    pub async fn execute(
        &self,
        surface: &SurfaceId,
        action: &Action,
        snapshot: &PageSnapshot,
        clipboard: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, ActionError> {
        ensure_live(cancel)?;
        match &action.kind {
            ActionKind::Navigate { url } => {
                self.navigate(surface, url, cancel).await?;
                Ok(ActionOutcome::Completed)
            }
            ActionKind::ReadText { .. } | ActionKind::CopyImageUrl { .. } => Ok(
                ActionOutcome::AwaitingCapture(self.gateway.request_capture(surface, action)),
            ),
            ActionKind::Wait => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ActionError::Cancelled),
                    _ = sleep(self.wait_duration) => Ok(ActionOutcome::Completed),
                }
            }
            ActionKind::Finish | ActionKind::Clarify { .. } => Err(
                ActionError::UnsupportedAction(action.kind_name().to_string()),
            ),
            ActionKind::Click { .. }
            | ActionKind::Type { .. }
            | ActionKind::Paste
            | ActionKind::Scroll { .. } => {
                self.with_control_channel(surface, action, snapshot, clipboard, cancel)
                    .await?;
                Ok(ActionOutcome::Completed)
            }
        }
    }

    /// Navigation that never blocks past the load timeout.
    async fn navigate(
        &self,
        surface: &SurfaceId,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let load = timeout(self.navigation_timeout, self.driver.navigate(surface, url));
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ActionError::Cancelled),
            result = load => result,
        };
        match result {
            Ok(result) => result.map_err(ActionError::from),
            Err(_) => {
                tracing::warn!(
                    "Navigation to {} did not report completion within {:?}, continuing",
                    url,
                    self.navigation_timeout
                );
                Ok(())
            }
        }
    }

    /// Run a side-effecting action while holding the control channel.
    async fn with_control_channel(
        &self,
        surface: &SurfaceId,
        action: &Action,
        snapshot: &PageSnapshot,
        clipboard: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.driver.attach(surface).await?;
        let result = self.apply(surface, action, snapshot, clipboard, cancel).await;
        if let Err(e) = self.driver.detach(surface).await {
            tracing::warn!("Failed to detach from {}: {}", surface, e);
        }
        result
    }

    async fn apply(
        &self,
        surface: &SurfaceId,
        action: &Action,
        snapshot: &PageSnapshot,
        clipboard: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        match &action.kind {
            ActionKind::Click { selector } => {
                let point = snapshot
                    .locate(selector)
                    .ok_or_else(|| ActionError::ElementNotFound(selector.clone()))?;
                sleep(POINTER_SETTLE).await;
                ensure_live(cancel)?;
                self.driver.click(surface, point).await?;
            }
            ActionKind::Type { selector, text } => {
                let point = snapshot
                    .locate(selector)
                    .ok_or_else(|| ActionError::ElementNotFound(selector.clone()))?;
                sleep(POINTER_SETTLE).await;
                ensure_live(cancel)?;
                self.driver.click(surface, point).await?;
                // One key event pair per character; some frameworks ignore bulk inserts.
                for ch in text.chars() {
                    ensure_live(cancel)?;
                    self.driver.key_press(surface, ch).await?;
                }
            }
            ActionKind::Paste => {
                let data = clipboard
                    .filter(|d| !d.is_empty())
                    .ok_or(ActionError::EmptyClipboard)?;
                self.driver.insert_text(surface, data).await?;
            }
            ActionKind::Scroll { direction } => {
                let height = snapshot.page_height();
                let dy = match direction {
                    ScrollDirection::Down => height,
                    ScrollDirection::Up => -height,
                };
                self.driver.scroll_by(surface, dy).await?;
            }
            _ => {
                return Err(ActionError::UnsupportedAction(
                    action.kind_name().to_string(),
                ))
            }
        }
        Ok(())
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ActionError> {
    if cancel.is_cancelled() {
        Err(ActionError::Cancelled)
    } else {
        Ok(())
    }
}
