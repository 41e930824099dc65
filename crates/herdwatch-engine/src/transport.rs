//! Engine-side [`NotificationTransport`] implementations.

use herdwatch_core::{
  alert::AlertPayload,
  transport::{DeliveryError, NotificationTransport, Target},
};
use tracing::{info, warn};

/// Writes every payload to the log. Used when no push transport is
/// configured, and as a last-resort secondary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
  async fn send<'a>(
    &'a self,
    target: Target<'a>,
    payload: &'a AlertPayload,
  ) -> Result<(), DeliveryError> {
    let to = match target {
      Target::Device(t) => t.endpoint.as_str(),
      Target::Broadcast => "broadcast",
    };
    info!(
      to,
      kind = %payload.kind,
      severity = %payload.severity,
      title = %payload.title,
      "notification"
    );
    Ok(())
  }
}

/// Tries `primary`, and on any failure other than [`DeliveryError::Gone`]
/// retries once through `secondary`.
///
/// A gone target is reported as-is so the subscriber can be deactivated.
pub struct FallbackTransport<P, S> {
  primary:   P,
  secondary: S,
}

impl<P, S> FallbackTransport<P, S> {
  pub fn new(primary: P, secondary: S) -> Self { Self { primary, secondary } }
}

impl<P: NotificationTransport, S: NotificationTransport> NotificationTransport
  for FallbackTransport<P, S>
{
  async fn send<'a>(
    &'a self,
    target: Target<'a>,
    payload: &'a AlertPayload,
  ) -> Result<(), DeliveryError> {
    match self.primary.send(target, payload).await {
      Ok(()) => Ok(()),
      Err(e) if e.is_gone() => Err(e),
      Err(e) => {
        warn!(error = %e, "primary transport failed; trying secondary");
        self.secondary.send(target, payload).await
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use herdwatch_core::subscriber::NotificationTarget;

  use super::*;
  use crate::{dispatch::test_payload, tests::RecordingTransport};

  fn target() -> NotificationTarget {
    NotificationTarget { endpoint: "https://push.example/1".into(), keys: None }
  }

  #[tokio::test]
  async fn falls_back_on_transport_error() {
    let t = FallbackTransport::new(
      RecordingTransport::failing(DeliveryError::Transport("down".into())),
      RecordingTransport::default(),
    );
    let endpoint = target();
    t.send(Target::Device(&endpoint), &test_payload(Utc::now())).await.unwrap();
    assert_eq!(t.secondary.sent().len(), 1);
  }

  #[tokio::test]
  async fn gone_is_not_retried() {
    let t = FallbackTransport::new(
      RecordingTransport::failing(DeliveryError::Gone("410".into())),
      RecordingTransport::default(),
    );
    let endpoint = target();
    let err = t.send(Target::Device(&endpoint), &test_payload(Utc::now())).await.unwrap_err();
    assert!(err.is_gone());
    assert!(t.secondary.sent().is_empty());
  }

  #[tokio::test]
  async fn log_transport_always_delivers() {
    LogTransport.send(Target::Broadcast, &test_payload(Utc::now())).await.unwrap();
  }
}
