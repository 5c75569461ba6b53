//! Run lifecycle events and their fan-out to connected subscribers.

pub mod broadcaster;
pub mod event;

pub use broadcaster::{Broadcaster, Outbound};
pub use event::RunEvent;
