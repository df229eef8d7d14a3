//! Solana pair monitor
//!
//! Watches an (account, asset) pair over a `logsSubscribe` feed, reconciles
//! it against account history and reports each transaction touching both
//! entities exactly once.

pub mod config;
pub mod error;
pub mod rpc;
pub mod state;
pub mod stream;

pub use config::{Importance, StreamConfig};
pub use error::{MonitorError, RpcError};
pub use stream::{ActivityEvent, ConnectionState, MonitoredPair, Origin, PairMonitor};
