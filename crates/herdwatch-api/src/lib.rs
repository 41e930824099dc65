//! JSON REST API for herdwatch.
//!
//! Exposes an axum [`Router`] over a [`MonitoringLoop`] and its store: the
//! subscription lifecycle, location ingestion, geofence management and the
//! manual monitoring endpoints. TLS and push encryption are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = herdwatch_api::app(state);
//! axum::serve(listener, app).await?;
//! ```
//!
//! or, to mount under another router:
//!
//! ```rust,ignore
//! .nest("/api", herdwatch_api::api_router(state.clone()))
//! ```

pub mod error;
pub mod monitoring;
pub mod subjects;
pub mod subscribers;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use herdwatch_core::{store::Store, transport::NotificationTransport};
use herdwatch_engine::{MonitoringLoop, UpdateFeed};

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct ApiState<S, T> {
  pub monitor:    Arc<MonitoringLoop<S, T>>,
  /// Location appends are published here for the reactive driver.
  pub feed:       UpdateFeed,
  pub started_at: DateTime<Utc>,
}

impl<S, T> ApiState<S, T> {
  pub fn new(monitor: Arc<MonitoringLoop<S, T>>, feed: UpdateFeed) -> Self {
    Self { monitor, feed, started_at: Utc::now() }
  }
}

// Derived `Clone` would require `S: Clone + T: Clone`.
impl<S, T> Clone for ApiState<S, T> {
  fn clone(&self) -> Self {
    Self {
      monitor:    self.monitor.clone(),
      feed:       self.feed.clone(),
      started_at: self.started_at,
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the `/api` router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, T>(state: ApiState<S, T>) -> Router<()>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  Router::new()
    // Subscribers
    .route("/subscribe", post(subscribers::subscribe::<S, T>))
    .route("/unsubscribe", post(subscribers::unsubscribe::<S, T>))
    .route("/subscribers/{id}/location", put(subscribers::update_location::<S, T>))
    // Subjects
    .route("/subjects", get(subjects::list::<S, T>))
    .route("/subjects/{id}", get(subjects::get_one::<S, T>))
    .route("/subjects/{id}/locations", post(subjects::append_location::<S, T>))
    .route(
      "/subjects/{id}/geofence",
      put(subjects::set_geofence::<S, T>).delete(subjects::clear_geofence::<S, T>),
    )
    // Monitoring
    .route("/check-proximity", post(monitoring::check_proximity::<S, T>))
    .route("/test-notification", post(monitoring::test_notification::<S, T>))
    .route("/stats", get(monitoring::stats::<S, T>))
    .route("/alerts", get(monitoring::alerts::<S, T>))
    .with_state(state)
}

/// The full application: the health document at `/` and the API under
/// `/api`.
pub fn app<S, T>(state: ApiState<S, T>) -> Router<()>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  Router::new()
    .route("/", get(monitoring::health))
    .nest("/api", api_router(state))
}
