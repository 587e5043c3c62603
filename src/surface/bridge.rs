//! Surface driver that forwards every primitive to the host.
//!
//! Commands go out as [`EngineEvent::DriverCommand`] with a fresh id; the
//! host answers each with a [`DriverReply`] carrying the same id. Only one
//! command is in flight at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::timeout;

use super::{DriverError, Point, SurfaceDriver, SurfaceId, SurfaceInfo};
use crate::protocol::{EngineEvent, EventBus};

/// Default time to wait for the host to acknowledge a command.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// A low-level primitive for the host to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriverCommand {
    ActiveSurface,
    Navigate { surface: SurfaceId, url: String },
    Attach { surface: SurfaceId },
    Detach { surface: SurfaceId },
    Click { surface: SurfaceId, x: i64, y: i64 },
    KeyPress { surface: SurfaceId, key: char },
    InsertText { surface: SurfaceId, text: String },
    ScrollBy { surface: SurfaceId, dy: i64 },
    Release { surface: SurfaceId },
}

/// The host's answer to a [`DriverCommand`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverReply {
    pub id: u64,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Set in answers to `active_surface`.
    #[serde(default)]
    pub surface: Option<SurfaceInfo>,
}

impl DriverReply {
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            ok: true,
            ..Default::default()
        }
    }

    pub fn failed(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            error: Some(error.into()),
            surface: None,
        }
    }

    pub fn with_surface(mut self, surface: SurfaceInfo) -> Self {
        self.surface = Some(surface);
        self
    }
}

pub struct BridgeDriver {
    bus: EventBus,
    pending: Mutex<Option<(u64, oneshot::Sender<DriverReply>)>>,
    in_flight: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    disconnected: AtomicBool,
    timeout: Duration,
}

impl BridgeDriver {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            pending: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
            disconnected: AtomicBool::new(false),
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Hand a reply from the host to the waiting command.
    ///
    /// Returns `false` for replies nobody is waiting for, such as answers
    /// that arrive after their command timed out.
    pub fn deliver(&self, reply: DriverReply) -> bool {
        let mut pending = self.pending.lock();
        match pending.as_ref() {
            Some((id, _)) if *id == reply.id => {}
            _ => {
                tracing::debug!("Dropping driver reply {}: not awaited", reply.id);
                return false;
            }
        }
        match pending.take() {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// The host is gone: fail the waiting command and every later one.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.pending.lock().take();
    }

    async fn send(&self, command: DriverCommand) -> Result<DriverReply, DriverError> {
        let _guard = self.in_flight.lock().await;
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(DriverError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some((id, tx));
        self.bus.emit(EngineEvent::DriverCommand { id, command });

        match timeout(self.timeout, rx).await {
            Ok(Ok(reply)) if reply.ok => Ok(reply),
            Ok(Ok(reply)) => Err(DriverError::CommandFailed(
                reply.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Ok(Err(_)) => Err(DriverError::Disconnected),
            Err(_) => {
                self.pending.lock().take();
                Err(DriverError::CommandFailed(format!(
                    "no reply within {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn send_ok(&self, command: DriverCommand) -> Result<(), DriverError> {
        self.send(command).await.map(|_| ())
    }
}

#[async_trait]
impl SurfaceDriver for BridgeDriver {
    async fn active_surface(&self) -> Result<SurfaceInfo, DriverError> {
        let reply = self
            .send(DriverCommand::ActiveSurface)
            .await
            .map_err(|_| DriverError::NoActiveSurface)?;
        reply.surface.ok_or(DriverError::NoActiveSurface)
    }

    async fn navigate(&self, surface: &SurfaceId, url: &str) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::Navigate {
            surface: surface.clone(),
            url: url.to_string(),
        })
        .await
    }

    async fn attach(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::Attach {
            surface: surface.clone(),
        })
        .await
        .map_err(|e| match e {
            DriverError::CommandFailed(msg) => DriverError::AttachFailed(msg),
            other => other,
        })
    }

    async fn detach(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::Detach {
            surface: surface.clone(),
        })
        .await
    }

    async fn click(&self, surface: &SurfaceId, point: Point) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::Click {
            surface: surface.clone(),
            x: point.x,
            y: point.y,
        })
        .await
    }

    async fn key_press(&self, surface: &SurfaceId, ch: char) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::KeyPress {
            surface: surface.clone(),
            key: ch,
        })
        .await
    }

    async fn insert_text(&self, surface: &SurfaceId, text: &str) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::InsertText {
            surface: surface.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn scroll_by(&self, surface: &SurfaceId, dy: i64) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::ScrollBy {
            surface: surface.clone(),
            dy,
        })
        .await
    }

    async fn release(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.send_ok(DriverCommand::Release {
            surface: surface.clone(),
        })
        .await
    }
}
