//! WebSocket push delivery for alert observers.
//!
//! Provides connection management, heartbeat pings, and the HTTP upgrade
//! handler used by the alert routes.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::alert_ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
