//! WebSocket transport for run events.
//!
//! Provides the authenticated upgrade handler and the heartbeat task; the
//! subscriber set itself lives in [`actlocal_events::Broadcaster`].

mod handler;
mod heartbeat;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
