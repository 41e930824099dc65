//! Geofence membership: the per-subject inside/outside state machine.
//!
//! ```text
//!   Unknown ──observe──▶ Inside | Outside      (baseline, never alerts)
//!   Inside  ──outside──▶ Outside               GeofenceBreach
//!   Outside ──inside───▶ Inside                GeofenceReturn
//!   Inside  ──inside───▶ Inside                (nothing)
//!   Outside ──outside──▶ Outside               (nothing)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::alert::AlertKind;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Membership {
  #[default]
  Unknown,
  Inside,
  Outside,
}

impl Membership {
  fn observed(inside: bool) -> Self {
    if inside { Self::Inside } else { Self::Outside }
  }
}

/// The last evaluated membership of one subject. Absence of a state means
/// [`Membership::Unknown`].
///
/// Stores drop the state whenever the subject's geofence is replaced or
/// detached, so a new boundary always starts from a silent baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipState {
  pub subject_id:        String,
  pub last_known_inside: bool,
  pub evaluated_at:      DateTime<Utc>,
  /// Timestamp of the location sample the state was decided from.
  pub sample_at:         DateTime<Utc>,
}

impl MembershipState {
  pub fn membership(&self) -> Membership { Membership::observed(self.last_known_inside) }

  /// `true` if a sample taken at `at` predates the one this state was
  /// decided from. Such a sample must not move the state.
  pub fn is_newer_than(&self, at: DateTime<Utc>) -> bool { at < self.sample_at }
}

impl From<Option<&MembershipState>> for Membership {
  fn from(state: Option<&MembershipState>) -> Self {
    state.map_or(Self::Unknown, MembershipState::membership)
  }
}

/// Advance the state machine by one observation.
pub fn next_state(prev: Membership, observed_inside: bool) -> (Membership, Option<AlertKind>) {
  let next = Membership::observed(observed_inside);
  let event = match (prev, next) {
    (Membership::Inside, Membership::Outside) => Some(AlertKind::GeofenceBreach),
    (Membership::Outside, Membership::Inside) => Some(AlertKind::GeofenceReturn),
    _ => None,
  };
  (next, event)
}
