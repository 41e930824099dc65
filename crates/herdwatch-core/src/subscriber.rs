//! A person who receives alerts at a known location.
//!
//! Unsubscribing is a soft delete: the status flips to
//! [`SubscriberStatus::Inactive`] and the record is kept for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::geo::Coordinate;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
  Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriberStatus {
  #[default]
  Active,
  Inactive,
}

/// Browser push-subscription keys. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
  pub p256dh: String,
  pub auth:   String,
}

/// Where notifications for a subscriber are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
  pub endpoint: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub keys:     Option<PushKeys>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
  pub id:            String,
  pub name:          String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email:         Option<String>,
  /// Last location reported by the subscriber's browser.
  pub location:      Option<Coordinate>,
  pub status:        SubscriberStatus,
  pub target:        NotificationTarget,
  pub subscribed_at: DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

impl Subscriber {
  /// A new active subscriber; `name` defaults to "Anonymous" when blank.
  pub fn new(
    id: impl Into<String>,
    name: impl Into<String>,
    target: NotificationTarget,
    location: Option<Coordinate>,
    now: DateTime<Utc>,
  ) -> Self {
    let name = name.into();
    Self {
      id: id.into(),
      name: if name.trim().is_empty() { "Anonymous".to_string() } else { name },
      phone: None,
      email: None,
      location,
      status: SubscriberStatus::Active,
      target,
      subscribed_at: now,
      updated_at: now,
    }
  }

  pub fn is_active(&self) -> bool { self.status == SubscriberStatus::Active }
}
