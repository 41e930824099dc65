//! Alert evaluation engine for herdwatch.
//!
//! Decides *whether* and *what* to notify: proximity between subscribers
//! and subjects, geofence breaches and returns, windowed deduplication, and
//! the monitoring loop that drives it all. Storage and delivery are
//! collaborators from [`herdwatch_core::store`] and
//! [`herdwatch_core::transport`].

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod geofence;
pub mod memory;
pub mod monitor;
pub mod proximity;
pub mod transport;

mod lock;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use feed::UpdateFeed;
pub use memory::MemoryStore;
pub use monitor::{CycleReport, Drive, MonitoringLoop};

#[cfg(test)]
mod tests;
