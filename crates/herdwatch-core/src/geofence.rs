//! Geofence boundaries as stored against a subject.
//!
//! A [`Geofence`] is the raw, possibly malformed boundary as it was saved.
//! It only becomes a [`Polygon`] through [`Geofence::polygon`], which is
//! where invalid boundaries are rejected.
//!
//! The ranger dashboard saves boundaries as a pipe-delimited string
//! of `lat,lng` pairs with a trailing pipe: `"1.0,2.0|1.5,2.5|2.0,2.0|"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  geo::{Coordinate, Polygon},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
  pub vertices:   Vec<Coordinate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_by: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
}

impl Geofence {
  pub fn new(vertices: Vec<Coordinate>) -> Self {
    Self { vertices, created_by: None, created_at: None }
  }

  /// Build from `[lat, lng]` pairs.
  pub fn from_pairs(pairs: &[[f64; 2]]) -> Self {
    Self::new(
      pairs
        .iter()
        .map(|[latitude, longitude]| Coordinate {
          latitude:  *latitude,
          longitude: *longitude,
        })
        .collect(),
    )
  }

  pub fn polygon(&self) -> Result<Polygon> { Polygon::new(self.vertices.clone()) }

  /// Parse the pipe-delimited `lat,lng|lat,lng|` format.
  pub fn parse_legacy(s: &str) -> Result<Self> {
    let vertices = s
      .split('|')
      .map(str::trim)
      .filter(|pair| !pair.is_empty())
      .map(parse_pair)
      .collect::<Result<Vec<_>>>()?;
    Ok(Self::new(vertices))
  }

  /// Render in the pipe-delimited format, trailing pipe included.
  pub fn to_legacy_string(&self) -> String {
    self
      .vertices
      .iter()
      .map(|c| format!("{},{}|", c.latitude, c.longitude))
      .collect()
  }
}

fn parse_pair(pair: &str) -> Result<Coordinate> {
  let (lat, lng) = pair
    .split_once(',')
    .ok_or_else(|| Error::InvalidGeofence(format!("expected `lat,lng`, got {pair:?}")))?;
  let parse = |s: &str| {
    s.trim()
      .parse::<f64>()
      .map_err(|e| Error::InvalidGeofence(format!("{s:?}: {e}")))
  };
  Coordinate::new(parse(lat)?, parse(lng)?)
}
