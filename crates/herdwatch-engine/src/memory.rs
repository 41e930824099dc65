//! [`MemoryStore`]: an in-process implementation of every store trait.
//!
//! Each map sits behind its own mutex, so a write touches exactly one slot
//! and is atomic. A geofence change also drops the subject's membership
//! while the subjects map is still locked. Nothing survives a restart;
//! membership therefore resets to "unknown" and the first observation after
//! a restart sets a fresh baseline without alerting.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertRecord},
  geo::Coordinate,
  geofence::Geofence,
  location::{LocationHistory, RawLocationSample},
  membership::MembershipState,
  store::{AlertStore, SubjectStore, SubscriberStore},
  subject::Subject,
  subscriber::{Subscriber, SubscriberStatus},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("memory store lock poisoned")]
  Poisoned,
}

#[derive(Default)]
struct Inner {
  subjects:    Mutex<BTreeMap<String, Subject>>,
  subscribers: Mutex<BTreeMap<String, Subscriber>>,
  latest:      Mutex<HashMap<AlertKey, AlertRecord>>,
  log:         Mutex<Vec<AlertRecord>>,
  membership:  Mutex<HashMap<String, MembershipState>>,
}

/// Clones share the same maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, MemoryStoreError> {
  m.lock().map_err(|_| MemoryStoreError::Poisoned)
}

// ─── SubjectStore ────────────────────────────────────────────────────────────

impl SubjectStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn get_subjects(&self) -> Result<Vec<Subject>, Self::Error> {
    Ok(lock(&self.inner.subjects)?.values().cloned().collect())
  }

  async fn get_subject(&self, id: &str) -> Result<Option<Subject>, Self::Error> {
    Ok(lock(&self.inner.subjects)?.get(id).cloned())
  }

  async fn get_location_history(&self, id: &str) -> Result<LocationHistory, Self::Error> {
    Ok(
      lock(&self.inner.subjects)?
        .get(id)
        .map(|s| s.locations.clone())
        .unwrap_or_default(),
    )
  }

  async fn append_location(
    &self,
    id: &str,
    sample: RawLocationSample,
  ) -> Result<(), Self::Error> {
    lock(&self.inner.subjects)?
      .entry(id.to_owned())
      .or_insert_with(|| Subject::new(id))
      .locations
      .push(sample);
    Ok(())
  }

  async fn set_geofence(
    &self,
    id: &str,
    geofence: Option<Geofence>,
  ) -> Result<(), Self::Error> {
    let mut subjects = lock(&self.inner.subjects)?;
    subjects
      .entry(id.to_owned())
      .or_insert_with(|| Subject::new(id))
      .geofence = geofence;
    lock(&self.inner.membership)?.remove(id);
    Ok(())
  }

  async fn upsert_subject(&self, subject: Subject) -> Result<(), Self::Error> {
    let mut subjects = lock(&self.inner.subjects)?;
    let fence_changed = subjects
      .get(&subject.id)
      .is_some_and(|old| old.geofence != subject.geofence);
    if fence_changed {
      lock(&self.inner.membership)?.remove(&subject.id);
    }
    subjects.insert(subject.id.clone(), subject);
    Ok(())
  }
}

// ─── SubscriberStore ─────────────────────────────────────────────────────────

impl SubscriberStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn active_subscribers(&self) -> Result<Vec<Subscriber>, Self::Error> {
    Ok(
      lock(&self.inner.subscribers)?
        .values()
        .filter(|s| s.is_active())
        .cloned()
        .collect(),
    )
  }

  async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>, Self::Error> {
    Ok(lock(&self.inner.subscribers)?.get(id).cloned())
  }

  async fn upsert_subscriber(&self, subscriber: Subscriber) -> Result<(), Self::Error> {
    lock(&self.inner.subscribers)?.insert(subscriber.id.clone(), subscriber);
    Ok(())
  }

  async fn remove_subscriber(
    &self,
    id: &str,
    at: DateTime<Utc>,
  ) -> Result<bool, Self::Error> {
    let mut subscribers = lock(&self.inner.subscribers)?;
    let Some(s) = subscribers.get_mut(id) else { return Ok(false) };
    s.status = SubscriberStatus::Inactive;
    s.updated_at = at;
    Ok(true)
  }

  async fn update_subscriber_location(
    &self,
    id: &str,
    location: Coordinate,
    at: DateTime<Utc>,
  ) -> Result<bool, Self::Error> {
    let mut subscribers = lock(&self.inner.subscribers)?;
    match subscribers.get_mut(id) {
      Some(s) if s.is_active() => {
        s.location = Some(location);
        s.updated_at = at;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn subscriber_counts(&self) -> Result<(usize, usize), Self::Error> {
    let subscribers = lock(&self.inner.subscribers)?;
    let active = subscribers.values().filter(|s| s.is_active()).count();
    Ok((subscribers.len(), active))
  }
}

// ─── AlertStore ──────────────────────────────────────────────────────────────

impl AlertStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn last_alert(&self, key: &AlertKey) -> Result<Option<AlertRecord>, Self::Error> {
    Ok(lock(&self.inner.latest)?.get(key).cloned())
  }

  async fn record_alert(&self, record: AlertRecord) -> Result<(), Self::Error> {
    lock(&self.inner.latest)?.insert(record.key.clone(), record.clone());
    lock(&self.inner.log)?.push(record);
    Ok(())
  }

  async fn membership(
    &self,
    subject_id: &str,
  ) -> Result<Option<MembershipState>, Self::Error> {
    Ok(lock(&self.inner.membership)?.get(subject_id).cloned())
  }

  async fn save_membership(&self, state: MembershipState) -> Result<(), Self::Error> {
    lock(&self.inner.membership)?.insert(state.subject_id.clone(), state);
    Ok(())
  }

  async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, Self::Error> {
    Ok(lock(&self.inner.log)?.iter().rev().take(limit).cloned().collect())
  }

  async fn alert_count(&self) -> Result<usize, Self::Error> {
    Ok(lock(&self.inner.log)?.len())
  }
}
