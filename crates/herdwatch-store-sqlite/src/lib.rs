//! SQLite backend for herdwatch.
//!
//! Implements every store trait from [`herdwatch_core::store`] on a single
//! SQLite file. Wraps [`tokio_rusqlite`] so all database access runs on a
//! dedicated thread without blocking the async runtime; the single
//! connection also serialises writes, so each keyed upsert is atomic.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
