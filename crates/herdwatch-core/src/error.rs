//! Error types for `herdwatch-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("coordinate out of range: latitude {latitude}, longitude {longitude}")]
  InvalidCoordinate { latitude: f64, longitude: f64 },

  #[error("polygon needs at least 3 distinct vertices, got {0}")]
  InvalidPolygon(usize),

  #[error("malformed geofence: {0}")]
  InvalidGeofence(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
