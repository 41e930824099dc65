//! Core types and trait definitions for herdwatch.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. The geometry, the latest-location resolution and the
//! geofence state machine are pure functions; everything with side effects
//! is expressed as a collaborator trait in [`store`] or [`transport`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod alert;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod location;
pub mod membership;
pub mod store;
pub mod subject;
pub mod subscriber;
pub mod transport;

mod lenient;

pub use error::{Error, Result};
