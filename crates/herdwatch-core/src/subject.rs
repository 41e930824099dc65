//! A tracked animal and everything known about its position.
//!
//! Subjects are created externally the first time a device reports for
//! them and are never deleted by the engine.

use serde::{Deserialize, Serialize};

use crate::{
  geofence::Geofence,
  location::{LocationHistory, LocationSample},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
  pub id:        String,
  #[serde(default)]
  pub locations: LocationHistory,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub geofence:  Option<Geofence>,
}

impl Subject {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id:        id.into(),
      locations: LocationHistory::default(),
      geofence:  None,
    }
  }

  pub fn latest_location(&self) -> Option<LocationSample> { self.locations.latest() }
}

/// Compact read model for listings: no full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
  pub id:            String,
  pub sample_count:  usize,
  pub latest:        Option<LocationSample>,
  pub has_geofence:  bool,
}

impl From<&Subject> for SubjectSummary {
  fn from(s: &Subject) -> Self {
    Self {
      id:           s.id.clone(),
      sample_count: s.locations.len(),
      latest:       s.latest_location(),
      has_geofence: s.geofence.is_some(),
    }
  }
}
