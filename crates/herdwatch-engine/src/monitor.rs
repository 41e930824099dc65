//! The monitoring loop: drives evaluation cycles and routes decided alerts
//! through deduplication and dispatch.
//!
//! A cycle has two passes over the same snapshot of subjects and active
//! subscribers:
//!
//! 1. geofence pass: each subject with a geofence advances its membership
//!    state; a transition becomes a broadcast alert;
//! 2. proximity pass: every (subscriber, subject) pair with both locations
//!    known is measured; breaches become per-subscriber alerts.
//!
//! Polled and reactive drivers share the same cycle code, so identical
//! input produces identical decisions whichever driver runs it. A bad pair
//! is counted as skipped and never aborts the cycle.
//!
//! A geofence transition is only saved once its alert has been suppressed
//! or recorded. If the dedup lookup or the record fails, the membership
//! stays where it was and the next cycle raises the transition again.

use std::{
  collections::{BTreeSet, HashSet},
  sync::Arc,
};

use chrono::{DateTime, TimeDelta, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertKind, Severity},
  store::Store,
  subject::Subject,
  subscriber::Subscriber,
  transport::NotificationTransport,
};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tokio::{
  sync::broadcast::error::{RecvError, TryRecvError},
  time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  Result,
  config::EngineConfig,
  dedup::AlertDeduplicator,
  dispatch::{AlertCandidate, AlertDispatcher, DispatchResult, Recipient},
  error::guarded,
  feed::UpdateFeed,
  geofence::GeofenceEvaluator,
  lock::KeyedLocks,
  proximity::ProximityEvaluator,
};

/// Which driver(s) run the loop.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Drive {
  /// Full cross product on a fixed interval.
  Polled,
  /// Affected subjects only, on each change-feed batch.
  Reactive,
  #[default]
  Both,
}

/// Counters for one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
  pub subscribers_checked: usize,
  pub subjects_checked:    usize,
  /// Pairs where both locations were known.
  pub proximity_checks:    usize,
  pub alerts_sent:         usize,
  pub alerts_suppressed:   usize,
  pub delivery_failures:   usize,
  /// Pairs or subjects skipped for invalid input or a transient failure.
  pub skipped:             usize,
  /// Subscribers deactivated because their target is gone.
  pub stale_targets:       usize,
}

/// How one [`MonitoringLoop::fire`] ended.
enum Fired {
  Suppressed,
  Dispatched(DispatchResult),
  /// The dedup lookup or the alert record failed.
  Failed,
}

pub struct MonitoringLoop<S, T> {
  store:      Arc<S>,
  config:     EngineConfig,
  proximity:  ProximityEvaluator,
  geofence:   GeofenceEvaluator<S>,
  dedup:      AlertDeduplicator<S>,
  dispatcher: AlertDispatcher<S, T>,
  locks:      KeyedLocks<AlertKey>,
}

impl<S: Store, T: NotificationTransport> MonitoringLoop<S, T> {
  /// Build a loop. Fails with [`crate::Error::Configuration`] if `config`
  /// is unusable.
  pub fn new(store: Arc<S>, transport: Arc<T>, config: EngineConfig) -> Result<Self> {
    config.validate()?;
    let timeout = config.call_timeout();
    Ok(Self {
      proximity: ProximityEvaluator::from_config(&config),
      geofence: GeofenceEvaluator::new(store.clone(), timeout),
      dedup: AlertDeduplicator::new(store.clone(), timeout),
      dispatcher: AlertDispatcher::new(store.clone(), transport, timeout),
      locks: KeyedLocks::new(),
      store,
      config,
    })
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn dispatcher(&self) -> &AlertDispatcher<S, T> { &self.dispatcher }

  // ─── Cycles ────────────────────────────────────────────────────────────────

  /// One polled cycle over every subject and every active subscriber.
  ///
  /// Returns an error only when the snapshot itself cannot be loaded.
  pub async fn run_cycle(&self) -> Result<CycleReport> {
    let timeout = self.config.call_timeout();
    let subjects = guarded(timeout, "load subjects", self.store.get_subjects()).await?;
    let subscribers =
      guarded(timeout, "load subscribers", self.store.active_subscribers()).await?;
    Ok(self.evaluate(&subjects, &subscribers, Utc::now()).await)
  }

  /// One reactive cycle over the given subjects only. Unknown ids are
  /// ignored.
  pub async fn evaluate_subjects(&self, ids: &[String]) -> Result<CycleReport> {
    let timeout = self.config.call_timeout();
    let mut subjects = Vec::with_capacity(ids.len());
    for id in ids {
      if let Some(s) = guarded(timeout, "load subject", self.store.get_subject(id)).await? {
        subjects.push(s);
      }
    }
    let subscribers =
      guarded(timeout, "load subscribers", self.store.active_subscribers()).await?;
    Ok(self.evaluate(&subjects, &subscribers, Utc::now()).await)
  }

  pub(crate) async fn evaluate(
    &self,
    subjects: &[Subject],
    subscribers: &[Subscriber],
    now: DateTime<Utc>,
  ) -> CycleReport {
    let mut report = CycleReport {
      subscribers_checked: subscribers.len(),
      subjects_checked: subjects.len(),
      ..Default::default()
    };

    for subject in subjects {
      self.geofence_pass(subject, now, &mut report).await;
    }

    let mut gone = HashSet::new();
    for subscriber in subscribers {
      for subject in subjects {
        if gone.contains(&subscriber.id) {
          break;
        }
        if self.proximity_pass(subscriber, subject, now, &mut report).await {
          gone.insert(subscriber.id.clone());
        }
      }
    }

    report
  }

  async fn geofence_pass(&self, subject: &Subject, now: DateTime<Utc>, report: &mut CycleReport) {
    let pending = match self.geofence.assess(subject, now).await {
      Ok(Some(pending)) => pending,
      Ok(None) => return,
      Err(e) => {
        warn!(subject_id = %subject.id, error = %e, "geofence evaluation skipped");
        report.skipped += 1;
        return;
      }
    };

    if let Some(kind) = pending.outcome.event {
      let candidate = AlertCandidate {
        kind,
        subject_id: subject.id.clone(),
        distance_km: None,
        location: pending.outcome.location,
        severity: match kind {
          AlertKind::GeofenceBreach => Severity::Critical,
          _ => Severity::Advisory,
        },
      };
      let fired = self
        .fire(&candidate, Recipient::Broadcast, self.config.geofence_window(), now, report)
        .await;
      if matches!(fired, Fired::Failed) {
        debug!(subject_id = %subject.id, "membership kept; transition retried next cycle");
        return;
      }
    }

    if let Err(e) = self.geofence.commit(pending).await {
      warn!(subject_id = %subject.id, error = %e, "membership not saved");
      report.skipped += 1;
    }
  }

  /// Returns `true` when the subscriber's target turned out to be gone.
  async fn proximity_pass(
    &self,
    subscriber: &Subscriber,
    subject: &Subject,
    now: DateTime<Utc>,
    report: &mut CycleReport,
  ) -> bool {
    let result = match self.proximity.evaluate(subscriber, subject) {
      Ok(Some(r)) => r,
      Ok(None) => return false,
      Err(e) => {
        warn!(
          subscriber_id = %subscriber.id,
          subject_id = %subject.id,
          error = %e,
          "proximity pair skipped"
        );
        report.skipped += 1;
        return false;
      }
    };
    report.proximity_checks += 1;
    debug!(
      subscriber_id = %result.subscriber_id,
      subject_id = %result.subject_id,
      distance_km = result.distance_km,
      breached = result.breached,
      "proximity evaluated"
    );
    if !result.breached {
      return false;
    }

    let candidate = AlertCandidate {
      kind:        AlertKind::Proximity,
      subject_id:  subject.id.clone(),
      distance_km: Some(result.distance_km),
      location:    result.subject_location,
      severity:    result.severity,
    };
    let dispatched = self
      .fire(
        &candidate,
        Recipient::Subscriber(subscriber),
        self.config.proximity_window(),
        now,
        report,
      )
      .await;

    match dispatched {
      Fired::Dispatched(r) if r.target_gone => {
        self.deactivate(subscriber, now, report).await;
        true
      }
      _ => false,
    }
  }

  /// Deduplicate and dispatch one alert under its key's lock.
  async fn fire(
    &self,
    candidate: &AlertCandidate,
    recipient: Recipient<'_>,
    window: TimeDelta,
    now: DateTime<Utc>,
    report: &mut CycleReport,
  ) -> Fired {
    let key = candidate.key(recipient);
    let _guard = self.locks.lock(&key).await;

    match self.dedup.should_suppress(&key, now, window).await {
      Ok(true) => {
        debug!(key = %key, "alert suppressed by window");
        report.alerts_suppressed += 1;
        return Fired::Suppressed;
      }
      Ok(false) => {}
      Err(e) => {
        warn!(key = %key, error = %e, "dedup lookup failed; retrying next cycle");
        report.skipped += 1;
        return Fired::Failed;
      }
    }

    match self.dispatcher.dispatch(candidate, recipient, now).await {
      Ok(r) => {
        if r.delivered {
          report.alerts_sent += 1;
        } else {
          report.delivery_failures += 1;
        }
        Fired::Dispatched(r)
      }
      Err(e) => {
        warn!(key = %key, error = %e, "alert could not be recorded");
        report.skipped += 1;
        Fired::Failed
      }
    }
  }

  async fn deactivate(&self, subscriber: &Subscriber, now: DateTime<Utc>, report: &mut CycleReport) {
    let removed = guarded(
      self.config.call_timeout(),
      "deactivate subscriber",
      self.store.remove_subscriber(&subscriber.id, now),
    )
    .await;
    match removed {
      Ok(_) => {
        warn!(subscriber_id = %subscriber.id, "notification target gone; subscriber deactivated");
        report.stale_targets += 1;
      }
      Err(e) => {
        warn!(subscriber_id = %subscriber.id, error = %e, "failed to deactivate stale subscriber");
      }
    }
  }

  // ─── Drivers ───────────────────────────────────────────────────────────────

  /// Run a full cycle every `poll_interval` until `token` is cancelled. The
  /// first cycle runs immediately; a cycle in flight when cancellation
  /// arrives is allowed to finish.
  pub async fn run_polled(&self, token: CancellationToken) {
    let mut ticker = tokio::time::interval(self.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = self.config.poll_interval_ms, "polled monitoring started");

    loop {
      tokio::select! {
        biased;
        () = token.cancelled() => break,
        _ = ticker.tick() => {
          match self.run_cycle().await {
            Ok(report) => log_report(Drive::Polled, &report),
            Err(e) => warn!(error = %e, "polled cycle failed; retrying next interval"),
          }
        }
      }
    }
    info!("polled monitoring stopped");
  }

  /// Re-evaluate subjects as their updates arrive on `feed`, batching
  /// whatever is queued. A receiver that falls behind runs a full cycle
  /// instead, since it cannot know which updates it missed.
  pub async fn run_reactive(&self, feed: &UpdateFeed, token: CancellationToken) {
    let mut rx = feed.subscribe();
    info!("reactive monitoring started");

    loop {
      let first = tokio::select! {
        biased;
        () = token.cancelled() => break,
        msg = rx.recv() => msg,
      };

      let mut ids = BTreeSet::new();
      let mut full = false;
      match first {
        Ok(id) => {
          ids.insert(id);
        }
        Err(RecvError::Lagged(skipped)) => {
          warn!(skipped, "change feed lagged; running a full cycle");
          full = true;
        }
        Err(RecvError::Closed) => break,
      }
      loop {
        match rx.try_recv() {
          Ok(id) => {
            ids.insert(id);
          }
          Err(TryRecvError::Lagged(_)) => full = true,
          Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
      }

      let result = if full {
        self.run_cycle().await
      } else {
        let ids: Vec<String> = ids.into_iter().collect();
        self.evaluate_subjects(&ids).await
      };
      match result {
        Ok(report) => log_report(Drive::Reactive, &report),
        Err(e) => warn!(error = %e, "reactive cycle failed"),
      }
    }
    info!("reactive monitoring stopped");
  }

  /// Run the selected driver(s) until `token` is cancelled.
  pub async fn run(&self, drive: Drive, feed: &UpdateFeed, token: CancellationToken) {
    match drive {
      Drive::Polled => self.run_polled(token).await,
      Drive::Reactive => self.run_reactive(feed, token).await,
      Drive::Both => {
        tokio::join!(self.run_polled(token.clone()), self.run_reactive(feed, token));
      }
    }
  }
}

fn log_report(drive: Drive, r: &CycleReport) {
  info!(
    drive = %drive,
    subjects = r.subjects_checked,
    subscribers = r.subscribers_checked,
    checks = r.proximity_checks,
    sent = r.alerts_sent,
    suppressed = r.alerts_suppressed,
    failed = r.delivery_failures,
    skipped = r.skipped,
    stale = r.stale_targets,
    "monitoring cycle complete"
  );
}
