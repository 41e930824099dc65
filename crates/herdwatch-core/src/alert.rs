//! Alert identities, audit records and notification payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::geo::Coordinate;

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// The three conditions the engine alerts on.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
  Proximity,
  GeofenceBreach,
  GeofenceReturn,
}

/// Everything a payload can announce, including the non-alert messages sent
/// on subscription and on operator request.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
  Proximity,
  GeofenceBreach,
  GeofenceReturn,
  Welcome,
  Test,
}

impl From<AlertKind> for NotificationKind {
  fn from(k: AlertKind) -> Self {
    match k {
      AlertKind::Proximity => Self::Proximity,
      AlertKind::GeofenceBreach => Self::GeofenceBreach,
      AlertKind::GeofenceReturn => Self::GeofenceReturn,
    }
  }
}

// ─── Severity ────────────────────────────────────────────────────────────────

/// Presentation hint: how loudly a notification should be delivered.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
  Critical,
  Advisory,
}

impl Severity {
  /// Strictly closer than `critical_km` is critical.
  pub fn classify(distance_km: f64, critical_km: f64) -> Self {
    if distance_km < critical_km {
      Self::Critical
    } else {
      Self::Advisory
    }
  }

  /// Vibration pattern in milliseconds (on, off, on, ...).
  pub fn vibration(self) -> Vec<u32> {
    match self {
      Self::Critical => vec![1000, 500, 1000, 500, 1000],
      Self::Advisory => vec![200, 100, 200],
    }
  }

  /// Whether the notification should stay on screen until dismissed.
  pub fn require_interaction(self) -> bool { matches!(self, Self::Critical) }
}

// ─── Keys and records ────────────────────────────────────────────────────────

/// Who an alert was addressed to: one subscriber, or everyone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AlertScope {
  Subscriber(String),
  Global,
}

impl fmt::Display for AlertScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Subscriber(id) => write!(f, "subscriber:{id}"),
      Self::Global => f.write_str("global"),
    }
  }
}

/// Composite deduplication key: (subscriber-or-global, subject, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
  pub scope:      AlertScope,
  pub subject_id: String,
  pub kind:       AlertKind,
}

impl AlertKey {
  pub fn proximity(subscriber_id: &str, subject_id: &str) -> Self {
    Self {
      scope:      AlertScope::Subscriber(subscriber_id.to_owned()),
      subject_id: subject_id.to_owned(),
      kind:       AlertKind::Proximity,
    }
  }

  pub fn geofence(subject_id: &str, kind: AlertKind) -> Self {
    Self {
      scope:      AlertScope::Global,
      subject_id: subject_id.to_owned(),
      kind,
    }
  }
}

impl fmt::Display for AlertKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.scope, self.subject_id, self.kind)
  }
}

/// An alert that was fired (delivered or not). Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
  pub key:         AlertKey,
  pub distance_km: Option<f64>,
  pub fired_at:    DateTime<Utc>,
  /// `false` when the transport failed; the record still consumes the
  /// deduplication window.
  pub delivered:   bool,
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// What is handed to the notification transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
  pub kind:                NotificationKind,
  pub title:               String,
  pub body:                String,
  /// Notifications sharing a tag replace each other on the device.
  pub tag:                 String,
  pub severity:            Severity,
  pub subject_id:          Option<String>,
  pub distance_km:         Option<f64>,
  pub location:            Option<Coordinate>,
  pub fired_at:            DateTime<Utc>,
  pub vibrate:             Vec<u32>,
  pub require_interaction: bool,
}
