//! Request/response gateway to the page observer.
//!
//! Scans and data captures are published on the event bus; answers come back
//! through [`ObserverGateway::deliver_snapshot`] and
//! [`ObserverGateway::deliver_capture`].

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::snapshot::PageSnapshot;
use crate::actions::Action;
use crate::protocol::{EngineEvent, EventBus, Rendezvous};
use crate::surface::SurfaceId;

/// Default time to wait for a page snapshot.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time to wait for captured data.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Observer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObserverError {
    #[error("No page snapshot received within {0:?}")]
    ScanTimeout(Duration),
    #[error("No captured data received within {0:?}")]
    CaptureTimeout(Duration),
    #[error("Observer request superseded")]
    Superseded,
    #[error("Observer request cancelled")]
    Cancelled,
}

/// A capture request whose result has not arrived yet.
pub struct PendingCapture {
    rx: oneshot::Receiver<String>,
    deadline: Duration,
}

impl PendingCapture {
    /// Wait for the captured value, bounded by the capture timeout.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<String, ObserverError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ObserverError::Cancelled),
            result = timeout(self.deadline, self.rx) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(ObserverError::Superseded),
                Err(_) => Err(ObserverError::CaptureTimeout(self.deadline)),
            },
        }
    }
}

impl std::fmt::Debug for PendingCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCapture")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Gateway to the external page observer.
pub struct ObserverGateway {
    bus: EventBus,
    snapshots: Rendezvous<PageSnapshot>,
    captures: Rendezvous<String>,
    scan_timeout: Duration,
    capture_timeout: Duration,
}

impl ObserverGateway {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            snapshots: Rendezvous::new(),
            captures: Rendezvous::new(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, scan: Duration, capture: Duration) -> Self {
        self.scan_timeout = scan;
        self.capture_timeout = capture;
        self
    }

    /// Ask for a fresh snapshot of `surface` and wait for it.
    pub async fn request_snapshot(
        &self,
        surface: &SurfaceId,
        cancel: &CancellationToken,
    ) -> Result<PageSnapshot, ObserverError> {
        let rx = self.snapshots.expect();
        self.bus.emit(EngineEvent::RequestScan {
            surface: surface.clone(),
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                self.snapshots.cancel();
                Err(ObserverError::Cancelled)
            }
            result = timeout(self.scan_timeout, rx) => match result {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(_)) => Err(ObserverError::Superseded),
                Err(_) => {
                    self.snapshots.cancel();
                    Err(ObserverError::ScanTimeout(self.scan_timeout))
                }
            },
        }
    }

    /// Hand a capture action to the page side and return immediately.
    pub fn request_capture(&self, surface: &SurfaceId, action: &Action) -> PendingCapture {
        let rx = self.captures.expect();
        self.bus.emit(EngineEvent::DispatchAction {
            surface: surface.clone(),
            action: action.clone(),
        });
        PendingCapture {
            rx,
            deadline: self.capture_timeout,
        }
    }

    /// Returns `false` when no scan was outstanding.
    pub fn deliver_snapshot(&self, snapshot: PageSnapshot) -> bool {
        self.snapshots.deliver(snapshot)
    }

    /// Returns `false` when no capture was outstanding.
    pub fn deliver_capture(&self, value: String) -> bool {
        self.captures.deliver(value)
    }

    /// Drop any outstanding requests.
    pub fn reset(&self) {
        self.snapshots.cancel();
        self.captures.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_snapshot_round_trip_through_bus() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let gateway = Arc::new(ObserverGateway::new(bus));
        let cancel = CancellationToken::new();

        let responder = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                match events.recv().await.unwrap() {
                    EngineEvent::RequestScan { surface } => {
                        assert_eq!(surface.as_str(), "tab-1");
                        let snapshot = PageSnapshot {
                            url: "https://example.com".to_string(),
                            ..Default::default()
                        };
                        assert!(gateway.deliver_snapshot(snapshot));
                    }
                    other => panic!("unexpected event: {:?}", other),
                }
            })
        };

        let snapshot = gateway
            .request_snapshot(&SurfaceId::new("tab-1"), &cancel)
            .await
            .unwrap();
        assert_eq!(snapshot.url, "https://example.com");
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout() {
        let gateway = ObserverGateway::new(EventBus::default())
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));
        let err = gateway
            .request_snapshot(&SurfaceId::new("tab-1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ObserverError::ScanTimeout(Duration::from_secs(2)));
        assert!(!gateway.deliver_snapshot(PageSnapshot::default()));
    }

    #[tokio::test]
    async fn test_snapshot_cancelled() {
        let gateway = ObserverGateway::new(EventBus::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gateway
            .request_snapshot(&SurfaceId::new("tab-1"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ObserverError::Cancelled);
    }

    #[tokio::test]
    async fn test_capture_is_dispatched_and_awaited() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let gateway = ObserverGateway::new(bus);
        let action = Action::new(ActionKind::ReadText {
            selector: "h1".to_string(),
        });

        let pending = gateway.request_capture(&SurfaceId::new("tab-1"), &action);
        match events.try_recv().unwrap() {
            EngineEvent::DispatchAction { action, .. } => {
                assert_eq!(action.kind_name(), "read_text");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(gateway.deliver_capture("Heading".to_string()));
        let value = pending.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(value, "Heading");
    }
}
