//! Change feed of subject location updates.
//!
//! Producers (the location ingestion endpoint, a tracker bridge) call
//! [`UpdateFeed::publish`] after a sample is stored; the reactive driver
//! and any per-subject listeners receive the subject id.

use std::future::Future;

use tokio::{
  sync::broadcast::{self, error::RecvError},
  task::JoinHandle,
};
use tracing::{debug, warn};

/// Default number of buffered updates per receiver.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct UpdateFeed {
  tx: broadcast::Sender<String>,
}

impl UpdateFeed {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  /// Announce that `subject_id` has new data. Returns the number of
  /// receivers notified; zero when nobody is listening.
  pub fn publish(&self, subject_id: impl Into<String>) -> usize {
    let subject_id = subject_id.into();
    debug!(subject_id = %subject_id, "subject update published");
    self.tx.send(subject_id).unwrap_or(0)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<String> { self.tx.subscribe() }

  /// Run `callback` for every update to `subject_id` until the feed closes.
  pub fn on_update<F, Fut>(&self, subject_id: impl Into<String>, callback: F) -> JoinHandle<()>
  where
    F: Fn(String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let subject_id = subject_id.into();
    let mut rx = self.subscribe();
    tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(id) if id == subject_id => callback(id).await,
          Ok(_) => {}
          Err(RecvError::Lagged(skipped)) => {
            warn!(subject_id = %subject_id, skipped, "update listener lagged");
            callback(subject_id.clone()).await;
          }
          Err(RecvError::Closed) => break,
        }
      }
    })
  }
}

impl Default for UpdateFeed {
  fn default() -> Self { Self::new(DEFAULT_CAPACITY) }
}
