//! Location samples and latest-location resolution.
//!
//! A subject's history is an unordered, append-only collection of samples.
//! Its current position is always the sample with the greatest timestamp;
//! samples that lack a coordinate or a timestamp are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};

use crate::{Error, Result, geo::Coordinate, lenient};

// ─── Samples ─────────────────────────────────────────────────────────────────

/// A fully resolved sample: valid coordinate plus timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
  pub coordinate: Coordinate,
  pub timestamp:  DateTime<Utc>,
  pub accuracy:   Option<f64>,
}

/// A sample as reported by a device, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLocationSample {
  #[serde(default, alias = "lat", deserialize_with = "lenient::opt_f64")]
  pub latitude:  Option<f64>,
  #[serde(default, alias = "lng", deserialize_with = "lenient::opt_f64")]
  pub longitude: Option<f64>,
  #[serde(default, deserialize_with = "lenient::opt_timestamp")]
  pub timestamp: Option<DateTime<Utc>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    deserialize_with = "lenient::opt_f64"
  )]
  pub accuracy:  Option<f64>,
}

impl RawLocationSample {
  pub fn new(coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
    Self {
      latitude:  Some(coordinate.latitude),
      longitude: Some(coordinate.longitude),
      timestamp: Some(timestamp),
      accuracy:  None,
    }
  }

  /// `None` unless latitude, longitude and timestamp are all present and the
  /// coordinate is in range.
  pub fn resolve(&self) -> Option<LocationSample> {
    let coordinate = Coordinate {
      latitude:  self.latitude?,
      longitude: self.longitude?,
    };
    coordinate.validate().ok()?;
    Some(LocationSample {
      coordinate,
      timestamp: self.timestamp?,
      accuracy: self.accuracy,
    })
  }
}

impl From<LocationSample> for RawLocationSample {
  fn from(s: LocationSample) -> Self {
    Self {
      accuracy: s.accuracy,
      ..Self::new(s.coordinate, s.timestamp)
    }
  }
}

/// The sample with the maximum timestamp. Ties keep the first one
/// encountered.
pub fn latest_of<'a, I>(samples: I) -> Option<LocationSample>
where
  I: IntoIterator<Item = &'a RawLocationSample>,
{
  samples
    .into_iter()
    .filter_map(RawLocationSample::resolve)
    .fold(None, |best: Option<LocationSample>, s| match best {
      Some(b) if b.timestamp >= s.timestamp => Some(b),
      _ => Some(s),
    })
}

// ─── Legacy single-field format ──────────────────────────────────────────────

/// The pre-history `livelocation` field: one coordinate, optional timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyLocation {
  #[serde(default, alias = "latitude", deserialize_with = "lenient::opt_f64")]
  pub lat:       Option<f64>,
  #[serde(default, alias = "longitude", deserialize_with = "lenient::opt_f64")]
  pub lng:       Option<f64>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    deserialize_with = "lenient::opt_timestamp"
  )]
  pub timestamp: Option<DateTime<Utc>>,
}

impl LegacyLocation {
  /// Treated as a singleton history. A missing timestamp resolves to the
  /// Unix epoch so that any timestamped sample outranks it.
  pub fn resolve(&self) -> Option<LocationSample> { RawLocationSample::from(self).resolve() }
}

impl From<&LegacyLocation> for RawLocationSample {
  fn from(legacy: &LegacyLocation) -> Self {
    Self {
      latitude:  legacy.lat,
      longitude: legacy.lng,
      timestamp: Some(legacy.timestamp.unwrap_or_default()),
      accuracy:  None,
    }
  }
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Everything known about where a subject has been.
///
/// Deserialises from a JSON array of samples, an object keyed by push id
/// whose values are samples, or a bare legacy `{lat, lng}` object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocationHistory {
  Samples(Vec<RawLocationSample>),
  Legacy(LegacyLocation),
}

impl Default for LocationHistory {
  fn default() -> Self { Self::Samples(Vec::new()) }
}

impl LocationHistory {
  pub fn latest(&self) -> Option<LocationSample> {
    match self {
      Self::Samples(samples) => latest_of(samples),
      Self::Legacy(legacy) => legacy.resolve(),
    }
  }

  /// Append a sample. A legacy history is promoted to a sample list that
  /// keeps the legacy point as its first entry.
  pub fn push(&mut self, sample: RawLocationSample) {
    match self {
      Self::Samples(samples) => samples.push(sample),
      Self::Legacy(legacy) => {
        let first = RawLocationSample::from(&*legacy);
        *self = Self::Samples(vec![first, sample]);
      }
    }
  }

  pub fn len(&self) -> usize {
    match self {
      Self::Samples(samples) => samples.len(),
      Self::Legacy(_) => 1,
    }
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn from_value(value: Value) -> Result<Self> {
    match value {
      Value::Null => Ok(Self::default()),
      Value::Array(items) => Ok(Self::Samples(samples_from(items))),
      Value::Object(map) if is_legacy(&map) => {
        Ok(Self::Legacy(serde_json::from_value(Value::Object(map))?))
      }
      Value::Object(map) => {
        Ok(Self::Samples(samples_from(map.into_iter().map(|(_, v)| v))))
      }
      other => Err(Error::Serialization(de::Error::custom(format!(
        "location history must be an array or object, got {other}"
      )))),
    }
  }
}

impl<'de> Deserialize<'de> for LocationHistory {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    Self::from_value(Value::deserialize(d)?).map_err(de::Error::custom)
  }
}

fn samples_from(items: impl IntoIterator<Item = Value>) -> Vec<RawLocationSample> {
  items
    .into_iter()
    .filter_map(|v| serde_json::from_value(v).ok())
    .collect()
}

fn is_legacy(map: &Map<String, Value>) -> bool {
  let scalar = |k: &str| map.get(k).is_some_and(|v| !v.is_object() && !v.is_array());
  (scalar("lat") || scalar("latitude")) && (scalar("lng") || scalar("longitude"))
}
