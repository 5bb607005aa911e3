//! Push notifications: per-owner event fan-out and the HTTP/WS surface.

pub mod hub;
pub mod ws;

pub use hub::{JobEvent, NotificationHub};
pub use ws::{AppState, build_router};
