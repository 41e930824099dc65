//! Storage traits the engine depends on.
//!
//! The traits are implemented by storage backends (`herdwatch-store-sqlite`,
//! and the in-memory store in `herdwatch-engine`). Higher layers depend on
//! these abstractions, never on a concrete backend.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes (e.g. tokio with `axum`).

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  alert::{AlertKey, AlertRecord},
  geo::Coordinate,
  geofence::Geofence,
  location::{LocationHistory, RawLocationSample},
  membership::MembershipState,
  subject::Subject,
  subscriber::Subscriber,
};

// ─── Subjects ────────────────────────────────────────────────────────────────

/// Tracked subjects and their location histories.
pub trait SubjectStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Every known subject with its full history and geofence.
  fn get_subjects(
    &self,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_;

  fn get_subject<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + 'a;

  /// The raw history of one subject; empty if the subject is unknown.
  fn get_location_history<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<LocationHistory, Self::Error>> + Send + 'a;

  /// Append a sample, creating the subject on first observation.
  fn append_location<'a>(
    &'a self,
    id: &'a str,
    sample: RawLocationSample,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Attach, replace or (with `None`) detach a subject's geofence. Creates
  /// the subject if needed.
  fn set_geofence<'a>(
    &'a self,
    id: &'a str,
    geofence: Option<Geofence>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Create or wholly replace a subject, history included.
  fn upsert_subject(
    &self,
    subject: Subject,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Subscribers ─────────────────────────────────────────────────────────────

/// People receiving alerts.
pub trait SubscriberStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn active_subscribers(
    &self,
  ) -> impl Future<Output = Result<Vec<Subscriber>, Self::Error>> + Send + '_;

  /// Look up a subscriber regardless of status.
  fn get_subscriber<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Subscriber>, Self::Error>> + Send + 'a;

  fn upsert_subscriber(
    &self,
    subscriber: Subscriber,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Soft delete: mark inactive, keep the record. Returns `false` if no such
  /// subscriber exists.
  fn remove_subscriber<'a>(
    &'a self,
    id: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Record a new location for an active subscriber. Returns `false` if the
  /// subscriber is unknown or inactive.
  fn update_subscriber_location<'a>(
    &'a self,
    id: &'a str,
    location: Coordinate,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// `(total, active)` subscriber counts.
  fn subscriber_counts(
    &self,
  ) -> impl Future<Output = Result<(usize, usize), Self::Error>> + Send + '_;
}

// ─── Alert state ─────────────────────────────────────────────────────────────

/// Deduplication records, membership state and the alert audit log.
///
/// Each write is atomic for its single key; concurrent writes to the same
/// key are last-write-wins.
pub trait AlertStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The most recent alert recorded for `key`.
  fn last_alert<'a>(
    &'a self,
    key: &'a AlertKey,
  ) -> impl Future<Output = Result<Option<AlertRecord>, Self::Error>> + Send + 'a;

  /// Store `record` as the latest for its key and append it to the log.
  fn record_alert(
    &self,
    record: AlertRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn membership<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Option<MembershipState>, Self::Error>> + Send + 'a;

  fn save_membership(
    &self,
    state: MembershipState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The newest `limit` entries of the audit log, newest first.
  fn recent_alerts(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AlertRecord>, Self::Error>> + Send + '_;

  /// Total number of entries in the audit log.
  fn alert_count(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

/// A backend that provides every store the engine needs.
pub trait Store: SubjectStore + SubscriberStore + AlertStore {}

impl<T: SubjectStore + SubscriberStore + AlertStore> Store for T {}
