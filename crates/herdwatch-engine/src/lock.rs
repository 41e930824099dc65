//! Per-key serialisation.
//!
//! Evaluations of distinct keys run independently; evaluations of the same
//! key (e.g. a reactive update racing a polled cycle) queue behind one
//! another so each read-decide-write sequence completes before the next
//! one starts.
//!
//! A key's slot lives only while someone holds or waits for it; the last
//! guard to drop removes it from the map.

use std::{
  collections::HashMap,
  hash::Hash,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct KeyedLocks<K> {
  slots: Slots<K>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
  pub fn new() -> Self { Self { slots: Arc::default() } }

  /// Wait for exclusive access to `key`. Released when the guard drops.
  pub async fn lock(&self, key: &K) -> KeyGuard<K> {
    let slot = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      slots.entry(key.clone()).or_default().clone()
    };
    let guard = slot.lock_owned().await;
    KeyGuard { guard: Some(guard), key: key.clone(), slots: self.slots.clone() }
  }

  /// Number of keys currently held or waited on.
  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
  fn default() -> Self { Self::new() }
}

/// Exclusive access to one key of a [`KeyedLocks`].
pub struct KeyGuard<K: Eq + Hash> {
  guard: Option<OwnedMutexGuard<()>>,
  key:   K,
  slots: Slots<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
  fn drop(&mut self) {
    // Release first so the strong count only reflects the map and waiters.
    drop(self.guard.take());
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    let idle = slots
      .get(&self.key)
      .is_some_and(|slot| Arc::strong_count(slot) == 1);
    if idle {
      slots.remove(&self.key);
    }
  }
}
