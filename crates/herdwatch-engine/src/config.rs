//! Engine tuning knobs.

use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::{Error, Result};

/// Thresholds, windows and cadences for alert evaluation, deserialised from
/// the server's `[engine]` table. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// A subscriber within this distance of a subject is alerted.
  pub proximity_radius_km:       f64,
  /// Closer than this is a critical alert.
  pub critical_distance_km:      f64,
  /// Minimum time between two proximity alerts for the same key.
  pub proximity_dedup_window_ms: u64,
  /// Optional window for geofence alerts; `0` disables it and relies on the
  /// state machine alone.
  pub geofence_dedup_window_ms:  u64,
  pub poll_interval_ms:          u64,
  /// Deadline for each store or transport call.
  pub call_timeout_ms:           u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      proximity_radius_km:       5.0,
      critical_distance_km:      2.0,
      proximity_dedup_window_ms: 30 * 60 * 1000,
      geofence_dedup_window_ms:  0,
      poll_interval_ms:          2 * 60 * 1000,
      call_timeout_ms:           10_000,
    }
  }
}

impl EngineConfig {
  /// Reject settings the engine cannot run with.
  pub fn validate(&self) -> Result<()> {
    if !(self.proximity_radius_km.is_finite() && self.proximity_radius_km > 0.0) {
      return Err(Error::Configuration(format!(
        "proximity_radius_km must be positive, got {}",
        self.proximity_radius_km
      )));
    }
    if !(self.critical_distance_km.is_finite() && self.critical_distance_km >= 0.0) {
      return Err(Error::Configuration(format!(
        "critical_distance_km must be non-negative, got {}",
        self.critical_distance_km
      )));
    }
    if self.poll_interval_ms == 0 {
      return Err(Error::Configuration("poll_interval_ms must be non-zero".into()));
    }
    if self.call_timeout_ms == 0 {
      return Err(Error::Configuration("call_timeout_ms must be non-zero".into()));
    }
    Ok(())
  }

  pub fn proximity_window(&self) -> TimeDelta { millis(self.proximity_dedup_window_ms) }

  pub fn geofence_window(&self) -> TimeDelta { millis(self.geofence_dedup_window_ms) }

  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }

  pub fn call_timeout(&self) -> Duration { Duration::from_millis(self.call_timeout_ms) }
}

fn millis(ms: u64) -> TimeDelta {
  TimeDelta::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_reference_behaviour() {
    let c = EngineConfig::default();
    assert_eq!(c.proximity_radius_km, 5.0);
    assert_eq!(c.critical_distance_km, 2.0);
    assert_eq!(c.proximity_dedup_window_ms, 1_800_000);
    assert_eq!(c.poll_interval_ms, 120_000);
    assert!(c.validate().is_ok());
  }

  #[test]
  fn rejects_non_positive_radius() {
    for radius in [0.0, -1.0, f64::NAN] {
      let c = EngineConfig { proximity_radius_km: radius, ..Default::default() };
      assert!(matches!(c.validate(), Err(Error::Configuration(_))));
    }
  }

  #[test]
  fn rejects_zero_intervals() {
    let c = EngineConfig { poll_interval_ms: 0, ..Default::default() };
    assert!(c.validate().is_err());
    let c = EngineConfig { call_timeout_ms: 0, ..Default::default() };
    assert!(c.validate().is_err());
  }

  #[test]
  fn partial_tables_fill_defaults() {
    let c: EngineConfig =
      serde_json::from_str(r#"{"proximity_radius_km": 3.5}"#).unwrap();
    assert_eq!(c.proximity_radius_km, 3.5);
    assert_eq!(c.proximity_dedup_window_ms, 1_800_000);
  }
}
