//! End-to-end cycle tests against [`MemoryStore`] and a recording
//! transport.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertKind, AlertPayload, AlertRecord, NotificationKind, Severity},
  geo::Coordinate,
  geofence::Geofence,
  location::{LocationHistory, RawLocationSample},
  membership::{Membership, MembershipState},
  store::{AlertStore, SubjectStore, SubscriberStore},
  subject::Subject,
  subscriber::{NotificationTarget, Subscriber, SubscriberStatus},
  transport::{DeliveryError, NotificationTransport, Target},
};
use tokio_util::sync::CancellationToken;

use crate::{
  EngineConfig, Error, MemoryStore, MonitoringLoop, UpdateFeed, memory::MemoryStoreError,
};

// ─── Doubles ─────────────────────────────────────────────────────────────────

/// Records every payload it is asked to send, or fails with a fixed error.
#[derive(Default)]
pub(crate) struct RecordingTransport {
  sent:     Mutex<Vec<AlertPayload>>,
  failure:  Option<DeliveryError>,
  attempts: AtomicUsize,
}

impl RecordingTransport {
  pub(crate) fn failing(error: DeliveryError) -> Self {
    Self { failure: Some(error), ..Default::default() }
  }

  pub(crate) fn sent(&self) -> Vec<AlertPayload> {
    self.sent.lock().map(|v| v.clone()).unwrap_or_default()
  }

  pub(crate) fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }
}

impl NotificationTransport for RecordingTransport {
  async fn send<'a>(
    &'a self,
    _target: Target<'a>,
    payload: &'a AlertPayload,
  ) -> Result<(), DeliveryError> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    if let Some(e) = &self.failure {
      return Err(e.clone());
    }
    if let Ok(mut sent) = self.sent.lock() {
      sent.push(payload.clone());
    }
    Ok(())
  }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FlakyError {
  #[error("injected store failure")]
  Injected,
  #[error(transparent)]
  Memory(#[from] MemoryStoreError),
}

/// A [`MemoryStore`] whose `last_alert` can be made to fail a set number of
/// times.
#[derive(Default)]
pub(crate) struct FlakyStore {
  inner:             MemoryStore,
  last_alert_faults: AtomicUsize,
}

impl FlakyStore {
  pub(crate) fn fail_last_alert(&self, times: usize) {
    self.last_alert_faults.store(times, Ordering::SeqCst);
  }
}

impl SubjectStore for FlakyStore {
  type Error = FlakyError;

  async fn get_subjects(&self) -> Result<Vec<Subject>, FlakyError> {
    Ok(self.inner.get_subjects().await?)
  }

  async fn get_subject(&self, id: &str) -> Result<Option<Subject>, FlakyError> {
    Ok(self.inner.get_subject(id).await?)
  }

  async fn get_location_history(&self, id: &str) -> Result<LocationHistory, FlakyError> {
    Ok(self.inner.get_location_history(id).await?)
  }

  async fn append_location(&self, id: &str, sample: RawLocationSample) -> Result<(), FlakyError> {
    Ok(self.inner.append_location(id, sample).await?)
  }

  async fn set_geofence(&self, id: &str, geofence: Option<Geofence>) -> Result<(), FlakyError> {
    Ok(self.inner.set_geofence(id, geofence).await?)
  }

  async fn upsert_subject(&self, subject: Subject) -> Result<(), FlakyError> {
    Ok(self.inner.upsert_subject(subject).await?)
  }
}

impl SubscriberStore for FlakyStore {
  type Error = FlakyError;

  async fn active_subscribers(&self) -> Result<Vec<Subscriber>, FlakyError> {
    Ok(self.inner.active_subscribers().await?)
  }

  async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>, FlakyError> {
    Ok(self.inner.get_subscriber(id).await?)
  }

  async fn upsert_subscriber(&self, subscriber: Subscriber) -> Result<(), FlakyError> {
    Ok(self.inner.upsert_subscriber(subscriber).await?)
  }

  async fn remove_subscriber(&self, id: &str, at: DateTime<Utc>) -> Result<bool, FlakyError> {
    Ok(self.inner.remove_subscriber(id, at).await?)
  }

  async fn update_subscriber_location(
    &self,
    id: &str,
    location: Coordinate,
    at: DateTime<Utc>,
  ) -> Result<bool, FlakyError> {
    Ok(self.inner.update_subscriber_location(id, location, at).await?)
  }

  async fn subscriber_counts(&self) -> Result<(usize, usize), FlakyError> {
    Ok(self.inner.subscriber_counts().await?)
  }
}

impl AlertStore for FlakyStore {
  type Error = FlakyError;

  async fn last_alert(&self, key: &AlertKey) -> Result<Option<AlertRecord>, FlakyError> {
    let fault = self
      .last_alert_faults
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if fault {
      return Err(FlakyError::Injected);
    }
    Ok(self.inner.last_alert(key).await?)
  }

  async fn record_alert(&self, record: AlertRecord) -> Result<(), FlakyError> {
    Ok(self.inner.record_alert(record).await?)
  }

  async fn membership(&self, subject_id: &str) -> Result<Option<MembershipState>, FlakyError> {
    Ok(self.inner.membership(subject_id).await?)
  }

  async fn save_membership(&self, state: MembershipState) -> Result<(), FlakyError> {
    Ok(self.inner.save_membership(state).await?)
  }

  async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, FlakyError> {
    Ok(self.inner.recent_alerts(limit).await?)
  }

  async fn alert_count(&self) -> Result<usize, FlakyError> {
    Ok(self.inner.alert_count().await?)
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

const SQUARE: [[f64; 2]; 4] = [[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]];

struct Harness {
  store:     Arc<MemoryStore>,
  transport: Arc<RecordingTransport>,
  monitor:   MonitoringLoop<MemoryStore, RecordingTransport>,
}

fn harness_with(transport: RecordingTransport) -> Harness {
  let store = Arc::new(MemoryStore::new());
  let transport = Arc::new(transport);
  let monitor =
    MonitoringLoop::new(store.clone(), transport.clone(), EngineConfig::default()).unwrap();
  Harness { store, transport, monitor }
}

fn harness() -> Harness { harness_with(RecordingTransport::default()) }

fn c(lat: f64, lng: f64) -> Coordinate { Coordinate::new(lat, lng).unwrap() }

fn subscriber(id: &str, at: Coordinate) -> Subscriber {
  Subscriber::new(
    id,
    "Asha",
    NotificationTarget { endpoint: format!("https://push.example/{id}"), keys: None },
    Some(at),
    Utc::now(),
  )
}

async fn report_position(store: &MemoryStore, subject_id: &str, at: Coordinate) {
  store
    .append_location(subject_id, RawLocationSample::new(at, Utc::now()))
    .await
    .unwrap();
}

async fn report_position_at(
  store: &impl SubjectStore,
  subject_id: &str,
  at: Coordinate,
  when: DateTime<Utc>,
) {
  store
    .append_location(subject_id, RawLocationSample::new(at, when))
    .await
    .unwrap();
}

async fn fence(store: &MemoryStore, subject_id: &str, pairs: &[[f64; 2]]) {
  store
    .set_geofence(subject_id, Some(Geofence::from_pairs(pairs)))
    .await
    .unwrap();
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[test]
fn invalid_config_is_fatal_at_construction() {
  let config = EngineConfig { proximity_radius_km: 0.0, ..Default::default() };
  let result = MonitoringLoop::new(
    Arc::new(MemoryStore::new()),
    Arc::new(RecordingTransport::default()),
    config,
  );
  assert!(matches!(result, Err(Error::Configuration(_))));
}

// ─── Geofence ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn breach_fires_exactly_once() {
  let h = harness();
  fence(&h.store, "tusker", &SQUARE).await;
  report_position(&h.store, "tusker", c(5.0, 5.0)).await;

  let first = h.monitor.run_cycle().await.unwrap();
  assert_eq!(first.alerts_sent, 0, "baseline never alerts");

  report_position(&h.store, "tusker", c(15.0, 15.0)).await;
  let second = h.monitor.run_cycle().await.unwrap();
  assert_eq!(second.alerts_sent, 1);

  let third = h.monitor.run_cycle().await.unwrap();
  assert_eq!(third.alerts_sent, 0);

  let sent = h.transport.sent();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].kind, NotificationKind::GeofenceBreach);
  assert_eq!(sent[0].title, "GEOFENCE BREACH: tusker has crossed the boundary");

  let key = AlertKey::geofence("tusker", AlertKind::GeofenceBreach);
  assert!(h.store.last_alert(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn return_follows_breach() {
  let h = harness();
  fence(&h.store, "tusker", &SQUARE).await;
  for at in [c(5.0, 5.0), c(15.0, 15.0), c(4.0, 4.0)] {
    report_position(&h.store, "tusker", at).await;
    h.monitor.run_cycle().await.unwrap();
  }
  let kinds: Vec<_> = h.transport.sent().iter().map(|p| p.kind).collect();
  assert_eq!(kinds, vec![NotificationKind::GeofenceBreach, NotificationKind::GeofenceReturn]);
}

#[tokio::test]
async fn invalid_geofence_skips_only_that_subject() {
  let h = harness();
  fence(&h.store, "broken", &[[0.0, 0.0], [1.0, 1.0]]).await;
  report_position(&h.store, "broken", c(0.5, 0.5)).await;
  fence(&h.store, "tusker", &SQUARE).await;
  report_position(&h.store, "tusker", c(5.0, 5.0)).await;

  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.skipped, 1);
  assert_eq!(report.subjects_checked, 2);
  assert!(h.store.membership("broken").await.unwrap().is_none());
  let state = h.store.membership("tusker").await.unwrap().unwrap();
  assert_eq!(state.membership(), Membership::Inside);
}

#[tokio::test]
async fn reattached_geofence_starts_from_a_fresh_baseline() {
  let h = harness();
  fence(&h.store, "tusker", &SQUARE).await;
  report_position(&h.store, "tusker", c(5.0, 5.0)).await;
  h.monitor.run_cycle().await.unwrap();

  h.store.set_geofence("tusker", None).await.unwrap();
  h.monitor.run_cycle().await.unwrap();

  // The subject is nowhere near the new boundary.
  fence(&h.store, "tusker", &[[40.0, 40.0], [40.0, 41.0], [41.0, 41.0], [41.0, 40.0]]).await;
  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.alerts_sent, 0);
  assert!(h.transport.sent().is_empty());

  let state = h.store.membership("tusker").await.unwrap().unwrap();
  assert_eq!(state.membership(), Membership::Outside);
}

#[tokio::test]
async fn replaced_geofence_starts_from_a_fresh_baseline() {
  let h = harness();
  fence(&h.store, "tusker", &SQUARE).await;
  report_position(&h.store, "tusker", c(5.0, 5.0)).await;
  h.monitor.run_cycle().await.unwrap();

  fence(&h.store, "tusker", &[[20.0, 20.0], [20.0, 30.0], [30.0, 30.0], [30.0, 20.0]]).await;
  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.alerts_sent, 0);

  // Later movement is judged against the new boundary only.
  report_position(&h.store, "tusker", c(25.0, 25.0)).await;
  h.monitor.run_cycle().await.unwrap();
  let kinds: Vec<_> = h.transport.sent().iter().map(|p| p.kind).collect();
  assert_eq!(kinds, vec![NotificationKind::GeofenceReturn]);
}

#[tokio::test]
async fn late_polled_snapshot_does_not_flip_membership() {
  let h = harness();
  let t0 = Utc::now();
  fence(&h.store, "tusker", &SQUARE).await;
  report_position_at(h.store.as_ref(), "tusker", c(5.0, 5.0), t0).await;
  h.monitor.run_cycle().await.unwrap();

  // A polled cycle takes its snapshot, then the subject leaves and the
  // reactive driver gets there first.
  let snapshot = h.store.get_subjects().await.unwrap();
  report_position_at(h.store.as_ref(), "tusker", c(15.0, 15.0), t0 + TimeDelta::minutes(1)).await;
  let reactive = h.monitor.evaluate_subjects(&["tusker".to_string()]).await.unwrap();
  assert_eq!(reactive.alerts_sent, 1);

  let late = h.monitor.evaluate(&snapshot, &[], Utc::now()).await;
  assert_eq!(late.alerts_sent, 0);
  let next = h.monitor.run_cycle().await.unwrap();
  assert_eq!(next.alerts_sent, 0);

  let kinds: Vec<_> = h.transport.sent().iter().map(|p| p.kind).collect();
  assert_eq!(kinds, vec![NotificationKind::GeofenceBreach]);
}

#[tokio::test]
async fn failed_dedup_lookup_keeps_the_transition() {
  let store = Arc::new(FlakyStore::default());
  let transport = Arc::new(RecordingTransport::default());
  let config = EngineConfig { geofence_dedup_window_ms: 60_000, ..Default::default() };
  let monitor = MonitoringLoop::new(store.clone(), transport.clone(), config).unwrap();
  let t0 = Utc::now();

  store.set_geofence("tusker", Some(Geofence::from_pairs(&SQUARE))).await.unwrap();
  report_position_at(store.as_ref(), "tusker", c(5.0, 5.0), t0).await;
  monitor.run_cycle().await.unwrap();

  report_position_at(store.as_ref(), "tusker", c(15.0, 15.0), t0 + TimeDelta::minutes(1)).await;
  store.fail_last_alert(1);
  let failed = monitor.run_cycle().await.unwrap();
  assert_eq!(failed.alerts_sent, 0);
  assert_eq!(failed.skipped, 1);
  let state = store.membership("tusker").await.unwrap().unwrap();
  assert_eq!(state.membership(), Membership::Inside);

  let retried = monitor.run_cycle().await.unwrap();
  assert_eq!(retried.alerts_sent, 1);
  let kinds: Vec<_> = transport.sent().iter().map(|p| p.kind).collect();
  assert_eq!(kinds, vec![NotificationKind::GeofenceBreach]);

  let state = store.membership("tusker").await.unwrap().unwrap();
  assert_eq!(state.membership(), Membership::Outside);
}

// ─── Proximity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn nearby_subject_alerts_once_per_window() {
  let h = harness();
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(11.93, 75.63)).await;

  let first = h.monitor.run_cycle().await.unwrap();
  assert_eq!(first.proximity_checks, 1);
  assert_eq!(first.alerts_sent, 1);

  let sent = h.transport.sent();
  assert_eq!(sent[0].severity, Severity::Advisory);
  assert_eq!(sent[0].subject_id.as_deref(), Some("tusker"));

  // Unchanged state: nothing new.
  let second = h.monitor.run_cycle().await.unwrap();
  assert_eq!(second.alerts_sent, 0);
  assert_eq!(second.alerts_suppressed, 1);
  assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn distant_subject_does_not_alert() {
  let h = harness();
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(12.5, 76.5)).await;

  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.proximity_checks, 1);
  assert_eq!(report.alerts_sent, 0);
  assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn window_expiry_allows_a_new_alert() {
  let h = harness();
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(11.93, 75.63)).await;
  let key = AlertKey::proximity("sub-1", "tusker");

  let prior = |minutes_ago| AlertRecord {
    key:         key.clone(),
    distance_km: Some(4.0),
    fired_at:    Utc::now() - TimeDelta::minutes(minutes_ago),
    delivered:   true,
  };

  h.store.record_alert(prior(10)).await.unwrap();
  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.alerts_suppressed, 1);

  h.store.record_alert(prior(31)).await.unwrap();
  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.alerts_sent, 1);
}

#[tokio::test]
async fn failed_delivery_still_consumes_the_window() {
  let h = harness_with(RecordingTransport::failing(DeliveryError::Transport("down".into())));
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(11.93, 75.63)).await;

  let first = h.monitor.run_cycle().await.unwrap();
  assert_eq!(first.delivery_failures, 1);
  assert_eq!(first.alerts_sent, 0);

  let second = h.monitor.run_cycle().await.unwrap();
  assert_eq!(second.alerts_suppressed, 1);
  assert_eq!(h.transport.attempts(), 1);

  let record = h
    .store
    .last_alert(&AlertKey::proximity("sub-1", "tusker"))
    .await
    .unwrap()
    .unwrap();
  assert!(!record.delivered);
}

#[tokio::test]
async fn gone_target_deactivates_subscriber() {
  let h = harness_with(RecordingTransport::failing(DeliveryError::Gone("410".into())));
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(11.93, 75.63)).await;
  report_position(&h.store, "calf", c(11.91, 75.61)).await;

  let report = h.monitor.run_cycle().await.unwrap();
  assert_eq!(report.stale_targets, 1);
  assert_eq!(h.transport.attempts(), 1, "no further sends to a gone target");

  assert!(h.store.active_subscribers().await.unwrap().is_empty());
  let kept = h.store.get_subscriber("sub-1").await.unwrap().unwrap();
  assert_eq!(kept.status, SubscriberStatus::Inactive);
}

// ─── Drivers ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn polled_and_reactive_decide_alike() {
  async fn seed(h: &Harness) {
    h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
    h.store.upsert_subscriber(subscriber("sub-2", c(11.0, 75.0))).await.unwrap();
    report_position(&h.store, "tusker", c(11.93, 75.63)).await;
    report_position(&h.store, "calf", c(11.01, 75.01)).await;
  }

  let polled = harness();
  seed(&polled).await;
  let reactive = harness();
  seed(&reactive).await;

  let a = polled.monitor.run_cycle().await.unwrap();
  let b = reactive
    .monitor
    .evaluate_subjects(&["calf".to_string(), "tusker".to_string()])
    .await
    .unwrap();
  assert_eq!(a, b);

  let titles = |h: &Harness| {
    let mut t: Vec<_> = h.transport.sent().into_iter().map(|p| p.body).collect();
    t.sort();
    t
  };
  assert_eq!(titles(&polled), titles(&reactive));
}

#[tokio::test]
async fn polled_driver_runs_until_cancelled() {
  let h = harness();
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(11.93, 75.63)).await;

  let transport = h.transport.clone();
  let monitor = Arc::new(h.monitor);
  let token = CancellationToken::new();
  let task = {
    let monitor = monitor.clone();
    let token = token.clone();
    tokio::spawn(async move { monitor.run_polled(token).await })
  };

  for _ in 0..200 {
    if !transport.sent().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  token.cancel();
  task.await.unwrap();
  assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn reactive_driver_evaluates_published_subjects() {
  let h = harness();
  h.store.upsert_subscriber(subscriber("sub-1", c(11.9, 75.6))).await.unwrap();
  report_position(&h.store, "tusker", c(11.93, 75.63)).await;

  let feed = UpdateFeed::default();
  let transport = h.transport.clone();
  let monitor = Arc::new(h.monitor);
  let token = CancellationToken::new();
  let task = {
    let monitor = monitor.clone();
    let token = token.clone();
    let feed = feed.clone();
    tokio::spawn(async move { monitor.run_reactive(&feed, token).await })
  };

  // The driver subscribes once it starts; keep publishing until it reacts.
  for _ in 0..200 {
    if !transport.sent().is_empty() {
      break;
    }
    feed.publish("tusker");
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  token.cancel();
  task.await.unwrap();

  let sent = transport.sent();
  assert_eq!(sent.len(), 1, "later batches are deduplicated");
  assert_eq!(sent[0].kind, NotificationKind::Proximity);
}
