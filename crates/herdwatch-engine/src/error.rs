//! Error type for `herdwatch-engine`.
//!
//! The variants follow how the monitoring loop reacts to them: transient
//! failures are retried next cycle, invalid input skips one pair, delivery
//! failures still consume the deduplication window, and configuration
//! errors are fatal at startup.

use std::{future::Future, time::Duration};

use herdwatch_core::transport::DeliveryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error during {operation}: {source}")]
  TransientStore {
    operation: &'static str,
    #[source]
    source:    Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("{operation} timed out")]
  Timeout { operation: &'static str },

  #[error("invalid input: {0}")]
  InvalidInput(#[from] herdwatch_core::Error),

  #[error("delivery failed: {0}")]
  Delivery(#[from] DeliveryError),

  #[error("configuration error: {0}")]
  Configuration(String),
}

impl Error {
  /// Whether retrying on the next cycle may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::TransientStore { .. } | Self::Timeout { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Await a collaborator call with a deadline, mapping its error to
/// [`Error::TransientStore`] and an elapsed deadline to [`Error::Timeout`].
pub(crate) async fn guarded<F, T, E>(
  timeout: Duration,
  operation: &'static str,
  call: F,
) -> Result<T>
where
  F: Future<Output = Result<T, E>>,
  E: std::error::Error + Send + Sync + 'static,
{
  match tokio::time::timeout(timeout, call).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(e)) => Err(Error::TransientStore { operation, source: Box::new(e) }),
    Err(_elapsed) => Err(Error::Timeout { operation }),
  }
}
