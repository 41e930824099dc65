//! Pure geometry: great-circle distance and polygon membership.
//!
//! Coordinates are always `(latitude, longitude)` in decimal degrees. The
//! polygon test scans along latitude and counts crossings on the longitude
//! axis; points lying exactly on an edge resolve by the half-open crossing
//! rule below and therefore always give the same answer for the same input.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, lenient};

/// Mean Earth radius used by [`distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// ─── Coordinate ──────────────────────────────────────────────────────────────

/// A point on the globe. Immutable value.
///
/// Deserialisation accepts numbers or numeric strings, and the short `lat` /
/// `lng` field names used by older records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
  #[serde(alias = "lat", deserialize_with = "lenient::f64")]
  pub latitude:  f64,
  #[serde(alias = "lng", alias = "lon", deserialize_with = "lenient::f64")]
  pub longitude: f64,
}

impl Coordinate {
  /// Build a coordinate, rejecting values outside `[-90, 90]` / `[-180, 180]`.
  pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
    let c = Self { latitude, longitude };
    c.validate()?;
    Ok(c)
  }

  pub fn validate(&self) -> Result<()> {
    if (-90.0..=90.0).contains(&self.latitude)
      && (-180.0..=180.0).contains(&self.longitude)
    {
      Ok(())
    } else {
      Err(Error::InvalidCoordinate {
        latitude:  self.latitude,
        longitude: self.longitude,
      })
    }
  }
}

// ─── Distance ────────────────────────────────────────────────────────────────

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
  let d_lat = (b.latitude - a.latitude).to_radians();
  let d_lng = (b.longitude - a.longitude).to_radians();
  let h = (d_lat / 2.0).sin().powi(2)
    + a.latitude.to_radians().cos()
      * b.latitude.to_radians().cos()
      * (d_lng / 2.0).sin().powi(2);
  2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

// ─── Polygon ─────────────────────────────────────────────────────────────────

/// A simple closed ring of at least three vertices. The ring is implicitly
/// closed; no holes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
  vertices: Vec<Coordinate>,
}

impl Polygon {
  /// Validate and build a polygon. A trailing vertex equal to the first one
  /// (an explicitly closed ring) is dropped.
  pub fn new(mut vertices: Vec<Coordinate>) -> Result<Self> {
    for v in &vertices {
      v.validate()?;
    }
    if vertices.len() > 1 && vertices.first() == vertices.last() {
      vertices.pop();
    }
    if vertices.len() < 3 {
      return Err(Error::InvalidPolygon(vertices.len()));
    }
    Ok(Self { vertices })
  }

  pub fn vertices(&self) -> &[Coordinate] { &self.vertices }

  pub fn contains(&self, p: Coordinate) -> bool { point_in_polygon(p, self) }
}

impl TryFrom<Vec<Coordinate>> for Polygon {
  type Error = Error;

  fn try_from(vertices: Vec<Coordinate>) -> Result<Self> { Self::new(vertices) }
}

/// Even-odd ray cast. `x` is longitude, `y` is latitude; an edge counts as
/// crossed when exactly one endpoint lies strictly above the scan line.
pub fn point_in_polygon(p: Coordinate, polygon: &Polygon) -> bool {
  let v = &polygon.vertices;
  let (x, y) = (p.longitude, p.latitude);
  let mut inside = false;
  let mut j = v.len() - 1;
  for i in 0..v.len() {
    let (xi, yi) = (v[i].longitude, v[i].latitude);
    let (xj, yj) = (v[j].longitude, v[j].latitude);
    if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
      inside = !inside;
    }
    j = i;
  }
  inside
}
