//! Payload construction and hand-off to the notification transport.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertKind, AlertPayload, AlertRecord, AlertScope, NotificationKind, Severity},
  geo::Coordinate,
  store::AlertStore,
  subscriber::Subscriber,
  transport::{DeliveryError, NotificationTransport, Target},
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{Result, dedup::AlertDeduplicator};

/// Who receives an alert.
#[derive(Debug, Clone, Copy)]
pub enum Recipient<'a> {
  Subscriber(&'a Subscriber),
  Broadcast,
}

impl Recipient<'_> {
  fn scope(&self) -> AlertScope {
    match self {
      Self::Subscriber(s) => AlertScope::Subscriber(s.id.clone()),
      Self::Broadcast => AlertScope::Global,
    }
  }

  fn target(&self) -> Target<'_> {
    match self {
      Self::Subscriber(s) => Target::Device(&s.target),
      Self::Broadcast => Target::Broadcast,
    }
  }
}

/// An alert the evaluators decided to fire.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
  pub kind:        AlertKind,
  pub subject_id:  String,
  pub distance_km: Option<f64>,
  pub location:    Coordinate,
  pub severity:    Severity,
}

impl AlertCandidate {
  /// The deduplication key of this alert when sent to `recipient`.
  pub fn key(&self, recipient: Recipient<'_>) -> AlertKey {
    AlertKey {
      scope:      recipient.scope(),
      subject_id: self.subject_id.clone(),
      kind:       self.kind,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
  pub payload:     AlertPayload,
  pub delivered:   bool,
  /// Failure cause when `delivered` is false.
  pub reason:      Option<String>,
  /// The transport reported the target as permanently gone.
  pub target_gone: bool,
}

// ─── Templates ───────────────────────────────────────────────────────────────

/// Build the payload for an alert.
pub fn alert_payload(alert: &AlertCandidate, now: DateTime<Utc>) -> AlertPayload {
  let AlertCandidate { kind, ref subject_id, distance_km, location, severity } = *alert;
  let (title, body, tag) = match kind {
    AlertKind::Proximity => {
      let d = distance_km.unwrap_or_default();
      match severity {
        Severity::Critical => (
          "CRITICAL: Elephant Very Close!".to_string(),
          format!("Elephant {subject_id} detected {d:.1}km from your location. Seek safe shelter immediately!"),
          format!("elephant-{subject_id}"),
        ),
        Severity::Advisory => (
          "Elephant Alert".to_string(),
          format!("Elephant {subject_id} detected {d:.1}km from your location. Exercise caution and avoid the area."),
          format!("elephant-{subject_id}"),
        ),
      }
    }
    AlertKind::GeofenceBreach => (
      format!("GEOFENCE BREACH: {subject_id} has crossed the boundary"),
      format!(
        "{subject_id} left its geofence at {:.5}, {:.5}.",
        location.latitude, location.longitude
      ),
      format!("geofence-{subject_id}"),
    ),
    AlertKind::GeofenceReturn => (
      format!("GEOFENCE RETURN: {subject_id} is back inside the boundary"),
      format!(
        "{subject_id} re-entered its geofence at {:.5}, {:.5}.",
        location.latitude, location.longitude
      ),
      format!("geofence-{subject_id}"),
    ),
  };
  AlertPayload {
    kind: kind.into(),
    title,
    body,
    tag,
    severity,
    subject_id: Some(subject_id.clone()),
    distance_km,
    location: Some(location),
    fired_at: now,
    vibrate: severity.vibration(),
    require_interaction: severity.require_interaction(),
  }
}

fn notice(kind: NotificationKind, title: &str, body: &str, now: DateTime<Utc>) -> AlertPayload {
  let severity = Severity::Advisory;
  AlertPayload {
    kind,
    title: title.to_owned(),
    body: body.to_owned(),
    tag: kind.as_ref().to_owned(),
    severity,
    subject_id: None,
    distance_km: None,
    location: None,
    fired_at: now,
    vibrate: severity.vibration(),
    require_interaction: false,
  }
}

/// Sent once when a subscription is created.
pub fn welcome_payload(now: DateTime<Utc>) -> AlertPayload {
  notice(
    NotificationKind::Welcome,
    "Subscription Active",
    "You will now receive elephant proximity alerts!",
    now,
  )
}

/// Sent on operator request to check delivery end to end.
pub fn test_payload(now: DateTime<Utc>) -> AlertPayload {
  notice(
    NotificationKind::Test,
    "Test Notification",
    "This is a test push notification.",
    now,
  )
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct AlertDispatcher<A, T> {
  dedup:     AlertDeduplicator<A>,
  transport: Arc<T>,
  timeout:   Duration,
}

impl<A: AlertStore, T: NotificationTransport> AlertDispatcher<A, T> {
  pub fn new(store: Arc<A>, transport: Arc<T>, timeout: Duration) -> Self {
    Self { dedup: AlertDeduplicator::new(store, timeout), transport, timeout }
  }

  /// Build and send one alert, then record it.
  ///
  /// The record is written whether or not delivery succeeded, so a failing
  /// transport still consumes the deduplication window. Only a failure to
  /// write the record is returned as an error.
  pub async fn dispatch(
    &self,
    alert: &AlertCandidate,
    recipient: Recipient<'_>,
    now: DateTime<Utc>,
  ) -> Result<DispatchResult> {
    let payload = alert_payload(alert, now);
    let key = alert.key(recipient);
    let distance_km = alert.distance_km;

    let outcome = self.send_payload(recipient, &payload).await;
    let delivered = outcome.is_ok();

    self
      .dedup
      .record(AlertRecord { key: key.clone(), distance_km, fired_at: now, delivered })
      .await?;

    match &outcome {
      Ok(()) => info!(key = %key, distance_km, "alert sent"),
      Err(e) => warn!(key = %key, error = %e, "alert delivery failed"),
    }

    Ok(DispatchResult {
      payload,
      delivered,
      target_gone: outcome.as_ref().is_err_and(DeliveryError::is_gone),
      reason: outcome.err().map(|e| e.to_string()),
    })
  }

  /// Send a payload without recording it (welcome and test messages).
  pub async fn send_payload(
    &self,
    recipient: Recipient<'_>,
    payload: &AlertPayload,
  ) -> Result<(), DeliveryError> {
    match tokio::time::timeout(self.timeout, self.transport.send(recipient.target(), payload))
      .await
    {
      Ok(result) => result,
      Err(_elapsed) => Err(DeliveryError::Transport(format!(
        "timed out after {}ms",
        self.timeout.as_millis()
      ))),
    }
  }
}

#[cfg(test)]
mod tests {
  use herdwatch_core::subscriber::NotificationTarget;

  use super::*;
  use crate::{memory::MemoryStore, tests::RecordingTransport};

  fn c(lat: f64, lng: f64) -> Coordinate { Coordinate::new(lat, lng).unwrap() }

  fn candidate(kind: AlertKind, distance_km: Option<f64>, severity: Severity) -> AlertCandidate {
    AlertCandidate {
      kind,
      subject_id: "tusker".into(),
      distance_km,
      location: c(11.93, 75.63),
      severity,
    }
  }

  #[test]
  fn breach_copy() {
    let breach = candidate(AlertKind::GeofenceBreach, None, Severity::Critical);
    let p = alert_payload(&breach, Utc::now());
    assert_eq!(p.title, "GEOFENCE BREACH: tusker has crossed the boundary");
    assert_eq!(p.kind, NotificationKind::GeofenceBreach);
    assert!(p.require_interaction);
    assert_eq!(p.vibrate, vec![1000, 500, 1000, 500, 1000]);
  }

  #[test]
  fn proximity_copy_by_severity() {
    let now = Utc::now();
    let critical =
      alert_payload(&candidate(AlertKind::Proximity, Some(1.2), Severity::Critical), now);
    assert!(critical.title.starts_with("CRITICAL"));
    assert!(critical.body.contains("1.2km"));

    let advisory =
      alert_payload(&candidate(AlertKind::Proximity, Some(4.2), Severity::Advisory), now);
    assert_eq!(advisory.title, "Elephant Alert");
    assert_eq!(advisory.vibrate, vec![200, 100, 200]);
    assert!(!advisory.require_interaction);
    assert_eq!(advisory.tag, "elephant-tusker");
  }

  #[tokio::test]
  async fn failed_delivery_is_still_recorded() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(RecordingTransport::failing(DeliveryError::Gone("410".into())));
    let dispatcher = AlertDispatcher::new(store.clone(), transport, Duration::from_secs(5));
    let sub = Subscriber::new(
      "sub-1",
      "Asha",
      NotificationTarget { endpoint: "https://push.example/1".into(), keys: None },
      None,
      Utc::now(),
    );

    let r = dispatcher
      .dispatch(
        &candidate(AlertKind::Proximity, Some(3.0), Severity::Advisory),
        Recipient::Subscriber(&sub),
        Utc::now(),
      )
      .await
      .unwrap();

    assert!(!r.delivered);
    assert!(r.target_gone);
    assert!(r.reason.is_some());
    let stored = store.last_alert(&AlertKey::proximity("sub-1", "tusker")).await.unwrap().unwrap();
    assert!(!stored.delivered);
  }
}
