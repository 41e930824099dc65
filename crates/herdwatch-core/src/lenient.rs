//! Forgiving serde helpers for tracking-device payloads.
//!
//! Field devices and older clients send coordinates as JSON numbers or as
//! numeric strings, and timestamps as RFC 3339 strings or epoch
//! milliseconds. The optional variants map anything unusable to `None` so
//! that one bad sample is skipped instead of failing the whole history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, de};
use serde_json::Value;

pub(crate) fn f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
  let value = Value::deserialize(d)?;
  value_to_f64(&value)
    .ok_or_else(|| de::Error::custom(format!("expected a number, got {value}")))
}

pub(crate) fn opt_f64<'de, D: Deserializer<'de>>(
  d: D,
) -> Result<Option<f64>, D::Error> {
  Ok(value_to_f64(&Value::deserialize(d)?))
}

pub(crate) fn opt_timestamp<'de, D: Deserializer<'de>>(
  d: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
  Ok(value_to_timestamp(&Value::deserialize(d)?))
}

fn value_to_f64(value: &Value) -> Option<f64> {
  let n = match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }?;
  n.is_finite().then_some(n)
}

fn value_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
      .or_else(|| s.trim().parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
    Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
    _ => None,
  }
}
