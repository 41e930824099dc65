//! Subscriber-to-subject distance checks.

use herdwatch_core::{
  alert::Severity,
  geo::{self, Coordinate},
  subject::Subject,
  subscriber::Subscriber,
};
use serde::Serialize;

use crate::{Result, config::EngineConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityResult {
  pub subscriber_id:    String,
  pub subject_id:       String,
  pub distance_km:      f64,
  /// `distance_km <= radius`.
  pub breached:         bool,
  pub severity:         Severity,
  pub subject_location: Coordinate,
}

#[derive(Debug, Clone, Copy)]
pub struct ProximityEvaluator {
  radius_km:   f64,
  critical_km: f64,
}

impl ProximityEvaluator {
  pub fn new(radius_km: f64, critical_km: f64) -> Self { Self { radius_km, critical_km } }

  pub fn from_config(config: &EngineConfig) -> Self {
    Self::new(config.proximity_radius_km, config.critical_distance_km)
  }

  pub fn radius_km(&self) -> f64 { self.radius_km }

  /// Compare a subscriber's last known location with a subject's latest
  /// sample.
  ///
  /// Returns `Ok(None)` when either location is missing, and
  /// `Err(InvalidInput)` when a stored coordinate is out of range.
  pub fn evaluate(
    &self,
    subscriber: &Subscriber,
    subject: &Subject,
  ) -> Result<Option<ProximityResult>> {
    let Some(here) = subscriber.location else { return Ok(None) };
    let Some(latest) = subject.latest_location() else { return Ok(None) };
    here.validate()?;
    latest.coordinate.validate()?;

    let distance_km = geo::distance_km(here, latest.coordinate);
    Ok(Some(ProximityResult {
      subscriber_id: subscriber.id.clone(),
      subject_id: subject.id.clone(),
      distance_km,
      breached: distance_km <= self.radius_km,
      severity: Severity::classify(distance_km, self.critical_km),
      subject_location: latest.coordinate,
    }))
  }
}
