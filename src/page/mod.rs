//! Page observer boundary: snapshots and data capture.

mod gateway;
mod snapshot;

pub use gateway::{
    ObserverError, ObserverGateway, PendingCapture, DEFAULT_CAPTURE_TIMEOUT, DEFAULT_SCAN_TIMEOUT,
};
pub use snapshot::{FormInfo, FormInput, PageElement, PageSnapshot, Viewport, DEFAULT_VIEWPORT_HEIGHT};
