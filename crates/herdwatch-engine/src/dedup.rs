//! Time-window alert suppression.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertRecord},
  store::AlertStore,
};

use crate::{Result, error::guarded};

/// Decides whether an alert for a key is still inside its window, and
/// records fired alerts. Backed by any [`AlertStore`].
pub struct AlertDeduplicator<A> {
  store:   Arc<A>,
  timeout: Duration,
}

impl<A: AlertStore> AlertDeduplicator<A> {
  pub fn new(store: Arc<A>, timeout: Duration) -> Self { Self { store, timeout } }

  /// `true` iff an alert for `key` fired less than `window` before `now`.
  /// A non-positive window never suppresses.
  pub async fn should_suppress(
    &self,
    key: &AlertKey,
    now: DateTime<Utc>,
    window: TimeDelta,
  ) -> Result<bool> {
    if window <= TimeDelta::zero() {
      return Ok(false);
    }
    let last = guarded(self.timeout, "load last alert", self.store.last_alert(key)).await?;
    Ok(last.is_some_and(|r| now - r.fired_at < window))
  }

  /// Record an alert, delivered or not; it consumes the window either way.
  pub async fn record(&self, record: AlertRecord) -> Result<()> {
    guarded(self.timeout, "record alert", self.store.record_alert(record)).await
  }
}
