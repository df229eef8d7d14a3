//! Resilient log-subscription stream for one (account, asset) pair

pub mod backfill;
pub mod context;
pub mod reconnect;
pub mod subscriber;
pub mod supervisor;
pub mod types;
pub mod verify;

pub use backfill::{backfill, BackfillReport};
pub use reconnect::ReconnectBackoff;
pub use subscriber::{Inbound, LogNotification};
pub use supervisor::PairMonitor;
pub use types::*;
