//! Live sync: connection registry and event fan-out.

mod broadcaster;
mod registry;

pub use broadcaster::Broadcaster;
pub use registry::{ConnectionId, ConnectionRegistry};
