//! Target surface (browser tab) abstraction.
//!
//! The engine never touches a page directly. Everything that moves a pointer,
//! presses a key or changes the location goes through [`SurfaceDriver`].

pub mod bridge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use bridge::{BridgeDriver, DriverCommand, DriverReply};

/// Driver errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("No active surface found")]
    NoActiveSurface,
    #[error("Failed to attach control channel: {0}")]
    AttachFailed(String),
    #[error("Driver command failed: {0}")]
    CommandFailed(String),
    #[error("Driver disconnected")]
    Disconnected,
}

/// Identifier of a target surface (a browser tab or session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A surface as reported by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    /// Current location, when known.
    #[serde(default)]
    pub url: Option<String>,
}

impl SurfaceInfo {
    pub fn new(id: SurfaceId) -> Self {
        Self { id, url: None }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Whether the surface currently shows a browser-internal page that
    /// cannot be scanned.
    pub fn is_system_page(&self) -> bool {
        self.url
            .as_deref()
            .map(|url| {
                ["chrome://", "about:", "edge://", "chrome-extension://"]
                    .iter()
                    .any(|prefix| url.starts_with(prefix))
            })
            .unwrap_or(false)
    }
}

/// A point in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Low-level primitives against a surface.
///
/// `navigate` resolves once the page reports load completion. The pointer and
/// keyboard primitives are only valid between `attach` and `detach`.
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// The surface the user is currently looking at.
    async fn active_surface(&self) -> Result<SurfaceInfo, DriverError>;

    async fn navigate(&self, surface: &SurfaceId, url: &str) -> Result<(), DriverError>;

    /// Acquire the exclusive control channel.
    async fn attach(&self, surface: &SurfaceId) -> Result<(), DriverError>;

    /// Release the exclusive control channel.
    async fn detach(&self, surface: &SurfaceId) -> Result<(), DriverError>;

    /// Press and release the primary button at `point`.
    async fn click(&self, surface: &SurfaceId, point: Point) -> Result<(), DriverError>;

    /// Key down followed by key up for a single character.
    async fn key_press(&self, surface: &SurfaceId, ch: char) -> Result<(), DriverError>;

    async fn insert_text(&self, surface: &SurfaceId, text: &str) -> Result<(), DriverError>;

    /// Scroll the viewport vertically by `dy` pixels.
    async fn scroll_by(&self, surface: &SurfaceId, dy: i64) -> Result<(), DriverError>;

    /// Drop any automation session still held on the surface.
    async fn release(&self, surface: &SurfaceId) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_page_detection() {
        let id = SurfaceId::new("1");
        assert!(SurfaceInfo::new(id.clone())
            .with_url("chrome://newtab/")
            .is_system_page());
        assert!(SurfaceInfo::new(id.clone())
            .with_url("about:blank")
            .is_system_page());
        assert!(!SurfaceInfo::new(id.clone())
            .with_url("https://example.com")
            .is_system_page());
        assert!(!SurfaceInfo::new(id).is_system_page());
    }

    #[test]
    fn test_surface_id_serializes_transparently() {
        let id = SurfaceId::new("tab-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tab-7\"");
        assert_eq!(id.to_string(), "tab-7");
    }
}
