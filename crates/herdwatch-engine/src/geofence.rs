//! Geofence membership evaluation.
//!
//! Each subject with a geofence carries a persisted [`MembershipState`]. An
//! evaluation resolves the subject's latest location, tests it against the
//! polygon and advances the state machine in
//! [`herdwatch_core::membership::next_state`]. The read-decide-write
//! sequence for one subject is serialised by a per-subject lock.
//!
//! Deciding and saving are separate steps: [`GeofenceEvaluator::assess`]
//! returns a [`PendingMembership`] that keeps the subject locked, and only
//! [`GeofenceEvaluator::commit`] writes the new state. A caller that fails
//! to act on a transition drops the pending change and the next evaluation
//! sees the same transition again.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use herdwatch_core::{
  alert::AlertKind,
  geo::Coordinate,
  membership::{Membership, MembershipState, next_state},
  store::AlertStore,
  subject::Subject,
};
use tracing::debug;

use crate::{
  Result,
  error::guarded,
  lock::{KeyGuard, KeyedLocks},
};

/// The result of one membership evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceOutcome {
  pub subject_id: String,
  pub previous:   Membership,
  pub current:    Membership,
  /// Set only on an `Inside`/`Outside` transition.
  pub event:      Option<AlertKind>,
  pub location:   Coordinate,
}

/// A decided membership that has not been saved yet. The subject stays
/// locked until this is committed or dropped.
pub struct PendingMembership {
  pub outcome: GeofenceOutcome,
  state:       MembershipState,
  _guard:      KeyGuard<String>,
}

pub struct GeofenceEvaluator<A> {
  store:   Arc<A>,
  timeout: Duration,
  locks:   KeyedLocks<String>,
}

impl<A: AlertStore> GeofenceEvaluator<A> {
  pub fn new(store: Arc<A>, timeout: Duration) -> Self {
    Self { store, timeout, locks: KeyedLocks::new() }
  }

  /// Evaluate one subject and save the result.
  ///
  /// - no geofence: `Ok(None)`, no state is created;
  /// - malformed geofence: `Err(InvalidInput)`, state untouched;
  /// - no resolvable location: `Ok(None)`, state untouched;
  /// - latest sample older than the one the stored state came from:
  ///   `Ok(None)`, state untouched;
  /// - otherwise the new membership is saved and the outcome returned.
  pub async fn evaluate(
    &self,
    subject: &Subject,
    now: DateTime<Utc>,
  ) -> Result<Option<GeofenceOutcome>> {
    match self.assess(subject, now).await? {
      Some(pending) => self.commit(pending).await.map(Some),
      None => Ok(None),
    }
  }

  /// Decide the subject's next membership without saving it. Same cases as
  /// [`Self::evaluate`].
  pub async fn assess(
    &self,
    subject: &Subject,
    now: DateTime<Utc>,
  ) -> Result<Option<PendingMembership>> {
    let Some(geofence) = &subject.geofence else { return Ok(None) };
    let polygon = geofence.polygon()?;
    let Some(latest) = subject.latest_location() else {
      debug!(subject_id = %subject.id, "no resolvable location; membership unchanged");
      return Ok(None);
    };

    let guard = self.locks.lock(&subject.id).await;

    let prev = guarded(self.timeout, "load membership", self.store.membership(&subject.id))
      .await?;
    if prev.as_ref().is_some_and(|s| s.is_newer_than(latest.timestamp)) {
      debug!(
        subject_id = %subject.id,
        sample_at = %latest.timestamp,
        "snapshot older than stored membership; skipped"
      );
      return Ok(None);
    }

    let previous = Membership::from(prev.as_ref());
    let (current, event) = next_state(previous, polygon.contains(latest.coordinate));

    Ok(Some(PendingMembership {
      outcome: GeofenceOutcome {
        subject_id: subject.id.clone(),
        previous,
        current,
        event,
        location: latest.coordinate,
      },
      state:   MembershipState {
        subject_id:        subject.id.clone(),
        last_known_inside: current == Membership::Inside,
        evaluated_at:      now,
        sample_at:         latest.timestamp,
      },
      _guard:  guard,
    }))
  }

  /// Save a pending membership and release the subject.
  pub async fn commit(&self, pending: PendingMembership) -> Result<GeofenceOutcome> {
    let PendingMembership { outcome, state, _guard } = pending;
    guarded(self.timeout, "save membership", self.store.save_membership(state)).await?;

    debug!(
      subject_id = %outcome.subject_id,
      previous = %outcome.previous,
      current = %outcome.current,
      "geofence evaluated"
    );
    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeDelta;
  use herdwatch_core::{geofence::Geofence, location::RawLocationSample};

  use super::*;
  use crate::{Error, memory::MemoryStore};

  const SQUARE: [[f64; 2]; 4] = [[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]];

  fn evaluator(store: &MemoryStore) -> GeofenceEvaluator<MemoryStore> {
    GeofenceEvaluator::new(Arc::new(store.clone()), Duration::from_secs(5))
  }

  fn fenced_subject() -> Subject {
    let mut s = Subject::new("tusker");
    s.geofence = Some(Geofence::from_pairs(&SQUARE));
    s
  }

  fn move_to(s: &mut Subject, lat: f64, lng: f64, at: DateTime<Utc>) {
    s.locations.push(RawLocationSample::new(Coordinate::new(lat, lng).unwrap(), at));
  }

  #[tokio::test]
  async fn first_observation_sets_baseline_silently() {
    for (lat, lng, expected) in [(5.0, 5.0, Membership::Inside), (15.0, 15.0, Membership::Outside)] {
      let store = MemoryStore::new();
      let ev = evaluator(&store);
      let mut s = fenced_subject();
      move_to(&mut s, lat, lng, Utc::now());

      let out = ev.evaluate(&s, Utc::now()).await.unwrap().unwrap();
      assert_eq!(out.previous, Membership::Unknown);
      assert_eq!(out.current, expected);
      assert_eq!(out.event, None);
    }
  }

  #[tokio::test]
  async fn breach_then_return() {
    let store = MemoryStore::new();
    let ev = evaluator(&store);
    let t0 = Utc::now();
    let mut s = fenced_subject();

    move_to(&mut s, 5.0, 5.0, t0);
    assert_eq!(ev.evaluate(&s, t0).await.unwrap().unwrap().event, None);

    move_to(&mut s, 15.0, 15.0, t0 + TimeDelta::minutes(1));
    let out = ev.evaluate(&s, t0 + TimeDelta::minutes(1)).await.unwrap().unwrap();
    assert_eq!(out.event, Some(AlertKind::GeofenceBreach));

    // No further movement: nothing.
    let out = ev.evaluate(&s, t0 + TimeDelta::minutes(2)).await.unwrap().unwrap();
    assert_eq!(out.event, None);

    move_to(&mut s, 5.0, 6.0, t0 + TimeDelta::minutes(3));
    let out = ev.evaluate(&s, t0 + TimeDelta::minutes(3)).await.unwrap().unwrap();
    assert_eq!(out.event, Some(AlertKind::GeofenceReturn));
  }

  #[tokio::test]
  async fn subjects_without_geofence_are_skipped_entirely() {
    let store = MemoryStore::new();
    let mut s = Subject::new("calf");
    move_to(&mut s, 5.0, 5.0, Utc::now());
    assert!(evaluator(&store).evaluate(&s, Utc::now()).await.unwrap().is_none());
    assert!(store.membership("calf").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn missing_location_keeps_state() {
    let store = MemoryStore::new();
    let ev = evaluator(&store);
    let mut s = fenced_subject();
    move_to(&mut s, 5.0, 5.0, Utc::now());
    ev.evaluate(&s, Utc::now()).await.unwrap();
    let before = store.membership("tusker").await.unwrap();

    let blank = fenced_subject();
    assert!(ev.evaluate(&blank, Utc::now()).await.unwrap().is_none());
    assert_eq!(store.membership("tusker").await.unwrap(), before);
  }

  #[tokio::test]
  async fn older_snapshot_cannot_undo_a_transition() {
    let store = MemoryStore::new();
    let ev = evaluator(&store);
    let t0 = Utc::now();
    let mut s = fenced_subject();
    move_to(&mut s, 5.0, 5.0, t0);
    ev.evaluate(&s, t0).await.unwrap();

    let stale = s.clone();
    move_to(&mut s, 15.0, 15.0, t0 + TimeDelta::minutes(1));
    let out = ev.evaluate(&s, t0 + TimeDelta::minutes(1)).await.unwrap().unwrap();
    assert_eq!(out.event, Some(AlertKind::GeofenceBreach));

    assert!(ev.evaluate(&stale, t0 + TimeDelta::minutes(2)).await.unwrap().is_none());
    let state = store.membership("tusker").await.unwrap().unwrap();
    assert_eq!(state.membership(), Membership::Outside);
    assert_eq!(state.sample_at, t0 + TimeDelta::minutes(1));

    let out = ev.evaluate(&s, t0 + TimeDelta::minutes(3)).await.unwrap().unwrap();
    assert_eq!(out.event, None);
  }

  #[tokio::test]
  async fn dropped_assessment_leaves_state_alone() {
    let store = MemoryStore::new();
    let ev = evaluator(&store);
    let t0 = Utc::now();
    let mut s = fenced_subject();
    move_to(&mut s, 5.0, 5.0, t0);
    ev.evaluate(&s, t0).await.unwrap();

    move_to(&mut s, 15.0, 15.0, t0 + TimeDelta::minutes(1));
    let pending = ev.assess(&s, t0 + TimeDelta::minutes(1)).await.unwrap().unwrap();
    assert_eq!(pending.outcome.event, Some(AlertKind::GeofenceBreach));
    drop(pending);
    let state = store.membership("tusker").await.unwrap().unwrap();
    assert_eq!(state.membership(), Membership::Inside);

    // The same transition is offered again and commits this time.
    let pending = ev.assess(&s, t0 + TimeDelta::minutes(2)).await.unwrap().unwrap();
    assert_eq!(pending.outcome.event, Some(AlertKind::GeofenceBreach));
    ev.commit(pending).await.unwrap();
    let state = store.membership("tusker").await.unwrap().unwrap();
    assert_eq!(state.membership(), Membership::Outside);
  }

  #[tokio::test]
  async fn degenerate_polygon_is_invalid_input() {
    let store = MemoryStore::new();
    let mut s = Subject::new("tusker");
    s.geofence = Some(Geofence::from_pairs(&[[0.0, 0.0], [1.0, 1.0]]));
    move_to(&mut s, 5.0, 5.0, Utc::now());
    let err = evaluator(&store).evaluate(&s, Utc::now()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(store.membership("tusker").await.unwrap().is_none());
  }
}
