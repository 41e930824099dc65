//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Geofences, location samples and push
//! keys are compact JSON. Enums use their snake_case / lowercase names.

use chrono::{DateTime, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertKind, AlertRecord, AlertScope},
  geo::Coordinate,
  geofence::Geofence,
  location::{LegacyLocation, LocationHistory, RawLocationSample},
  membership::MembershipState,
  subject::Subject,
  subscriber::{NotificationTarget, PushKeys, Subscriber, SubscriberStatus},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Alert scope ─────────────────────────────────────────────────────────────

const SUBSCRIBER_PREFIX: &str = "subscriber:";

pub fn encode_scope(scope: &AlertScope) -> String { scope.to_string() }

pub fn decode_scope(s: &str) -> Result<AlertScope> {
  match s {
    "global" => Ok(AlertScope::Global),
    other => other
      .strip_prefix(SUBSCRIBER_PREFIX)
      .map(|id| AlertScope::Subscriber(id.to_owned()))
      .ok_or_else(|| Error::Decode(format!("unknown alert scope: {other:?}"))),
  }
}

pub fn decode_kind(s: &str) -> Result<AlertKind> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown alert kind: {s:?}")))
}

// ─── Subjects ────────────────────────────────────────────────────────────────

/// A subject's columns, encoded for writing.
pub struct SubjectColumns {
  pub geofence_json: Option<String>,
  pub legacy_json:   Option<String>,
  pub samples:       Vec<String>,
}

pub fn encode_geofence(g: &Geofence) -> Result<String> { Ok(serde_json::to_string(g)?) }

pub fn encode_sample(s: &RawLocationSample) -> Result<String> { Ok(serde_json::to_string(s)?) }

pub fn encode_subject(subject: &Subject) -> Result<SubjectColumns> {
  let geofence_json = subject.geofence.as_ref().map(encode_geofence).transpose()?;
  let (legacy_json, samples) = match &subject.locations {
    LocationHistory::Legacy(l) => (Some(serde_json::to_string(l)?), Vec::new()),
    LocationHistory::Samples(samples) => {
      (None, samples.iter().map(encode_sample).collect::<Result<_>>()?)
    }
  };
  Ok(SubjectColumns { geofence_json, legacy_json, samples })
}

/// Raw strings read from a `subjects` row.
pub struct RawSubject {
  pub subject_id:    String,
  pub geofence_json: Option<String>,
  pub legacy_json:   Option<String>,
}

impl RawSubject {
  /// Expects `subject_id, geofence_json, legacy_json`.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:    row.get(0)?,
      geofence_json: row.get(1)?,
      legacy_json:   row.get(2)?,
    })
  }
}

/// Raw strings read from a `locations` row.
pub struct RawSample {
  pub subject_id:  String,
  pub sample_json: String,
  pub legacy:      bool,
}

impl RawSample {
  /// Expects `subject_id, sample_json, legacy`.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:  row.get(0)?,
      sample_json: row.get(1)?,
      legacy:      row.get(2)?,
    })
  }

  pub fn into_sample(self) -> Result<RawLocationSample> {
    if self.legacy {
      let legacy: LegacyLocation = serde_json::from_str(&self.sample_json)?;
      Ok(RawLocationSample::from(&legacy))
    } else {
      Ok(serde_json::from_str(&self.sample_json)?)
    }
  }
}

/// Assemble a subject from its row and its location rows (in insertion
/// order). Sample rows take precedence over a leftover legacy location.
pub fn decode_subject(raw: RawSubject, samples: Vec<RawSample>) -> Result<Subject> {
  let geofence = raw
    .geofence_json
    .as_deref()
    .map(serde_json::from_str::<Geofence>)
    .transpose()?;

  let locations = match (samples.is_empty(), raw.legacy_json) {
    (true, Some(legacy)) => LocationHistory::Legacy(serde_json::from_str(&legacy)?),
    _ => LocationHistory::Samples(
      samples
        .into_iter()
        .map(RawSample::into_sample)
        .collect::<Result<_>>()?,
    ),
  };

  Ok(Subject { id: raw.subject_id, locations, geofence })
}

// ─── Subscribers ─────────────────────────────────────────────────────────────

/// Raw column values of a `subscribers` row.
pub struct RawSubscriber {
  pub subscriber_id: String,
  pub name:          String,
  pub phone:         Option<String>,
  pub email:         Option<String>,
  pub latitude:      Option<f64>,
  pub longitude:     Option<f64>,
  pub status:        String,
  pub endpoint:      String,
  pub keys_json:     Option<String>,
  pub subscribed_at: String,
  pub updated_at:    String,
}

/// Column list matching [`RawSubscriber::from_row`].
pub const SUBSCRIBER_COLUMNS: &str = "subscriber_id, name, phone, email, latitude, longitude, \
   status, endpoint, keys_json, subscribed_at, updated_at";

impl RawSubscriber {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subscriber_id: row.get(0)?,
      name:          row.get(1)?,
      phone:         row.get(2)?,
      email:         row.get(3)?,
      latitude:      row.get(4)?,
      longitude:     row.get(5)?,
      status:        row.get(6)?,
      endpoint:      row.get(7)?,
      keys_json:     row.get(8)?,
      subscribed_at: row.get(9)?,
      updated_at:    row.get(10)?,
    })
  }

  pub fn encode(s: &Subscriber) -> Result<Self> {
    Ok(Self {
      subscriber_id: s.id.clone(),
      name:          s.name.clone(),
      phone:         s.phone.clone(),
      email:         s.email.clone(),
      latitude:      s.location.map(|c| c.latitude),
      longitude:     s.location.map(|c| c.longitude),
      status:        s.status.as_ref().to_owned(),
      endpoint:      s.target.endpoint.clone(),
      keys_json:     s.target.keys.as_ref().map(serde_json::to_string).transpose()?,
      subscribed_at: encode_dt(s.subscribed_at),
      updated_at:    encode_dt(s.updated_at),
    })
  }

  pub fn into_subscriber(self) -> Result<Subscriber> {
    let status: SubscriberStatus = self
      .status
      .parse()
      .map_err(|_| Error::Decode(format!("unknown subscriber status: {:?}", self.status)))?;
    let keys = self
      .keys_json
      .as_deref()
      .map(serde_json::from_str::<PushKeys>)
      .transpose()?;
    let location = match (self.latitude, self.longitude) {
      (Some(latitude), Some(longitude)) => Some(Coordinate { latitude, longitude }),
      _ => None,
    };
    Ok(Subscriber {
      id: self.subscriber_id,
      name: self.name,
      phone: self.phone,
      email: self.email,
      location,
      status,
      target: NotificationTarget { endpoint: self.endpoint, keys },
      subscribed_at: decode_dt(&self.subscribed_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

/// Raw column values of a `recent_alerts` / `alert_log` row.
pub struct RawAlert {
  pub scope:       String,
  pub subject_id:  String,
  pub kind:        String,
  pub distance_km: Option<f64>,
  pub fired_at:    String,
  pub delivered:   bool,
}

/// Column list matching [`RawAlert::from_row`].
pub const ALERT_COLUMNS: &str = "scope, subject_id, kind, distance_km, fired_at, delivered";

impl RawAlert {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      scope:       row.get(0)?,
      subject_id:  row.get(1)?,
      kind:        row.get(2)?,
      distance_km: row.get(3)?,
      fired_at:    row.get(4)?,
      delivered:   row.get(5)?,
    })
  }

  pub fn encode(r: &AlertRecord) -> Self {
    Self {
      scope:       encode_scope(&r.key.scope),
      subject_id:  r.key.subject_id.clone(),
      kind:        r.key.kind.as_ref().to_owned(),
      distance_km: r.distance_km,
      fired_at:    encode_dt(r.fired_at),
      delivered:   r.delivered,
    }
  }

  pub fn into_record(self) -> Result<AlertRecord> {
    Ok(AlertRecord {
      key:         AlertKey {
        scope:      decode_scope(&self.scope)?,
        subject_id: self.subject_id,
        kind:       decode_kind(&self.kind)?,
      },
      distance_km: self.distance_km,
      fired_at:    decode_dt(&self.fired_at)?,
      delivered:   self.delivered,
    })
  }
}

// ─── Membership ──────────────────────────────────────────────────────────────

pub struct RawMembership {
  pub subject_id:        String,
  pub last_known_inside: bool,
  pub evaluated_at:      String,
  pub sample_at:         String,
}

impl RawMembership {
  pub fn into_state(self) -> Result<MembershipState> {
    Ok(MembershipState {
      subject_id:        self.subject_id,
      last_known_inside: self.last_known_inside,
      evaluated_at:      decode_dt(&self.evaluated_at)?,
      sample_at:         decode_dt(&self.sample_at)?,
    })
  }
}
