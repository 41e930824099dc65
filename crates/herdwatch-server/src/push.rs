//! Web-push-style delivery over plain HTTP.
//!
//! Each payload is POSTed as JSON to the subscriber's push endpoint, or to
//! the configured broadcast webhook. Payload encryption (VAPID / RFC 8291)
//! is left to a gateway in front of the push service.

use std::time::Duration;

use herdwatch_core::{
  alert::AlertPayload,
  transport::{DeliveryError, NotificationTransport, Target},
};
use reqwest::StatusCode;
use tracing::debug;

/// How long the push service should keep an undelivered message.
const TTL_SECONDS: &str = "86400";

pub struct HttpPushTransport {
  client:        reqwest::Client,
  broadcast_url: Option<String>,
}

impl HttpPushTransport {
  pub fn new(timeout: Duration, broadcast_url: Option<String>) -> reqwest::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("herdwatch/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, broadcast_url })
  }

  fn url<'a>(&'a self, target: Target<'a>) -> Result<&'a str, DeliveryError> {
    match target {
      Target::Device(t) => Ok(t.endpoint.as_str()),
      Target::Broadcast => self
        .broadcast_url
        .as_deref()
        .ok_or(DeliveryError::Unsupported("broadcast")),
    }
  }
}

impl NotificationTransport for HttpPushTransport {
  async fn send<'a>(
    &'a self,
    target: Target<'a>,
    payload: &'a AlertPayload,
  ) -> Result<(), DeliveryError> {
    let url = self.url(target)?;
    let resp = self
      .client
      .post(url)
      .header("TTL", TTL_SECONDS)
      .json(payload)
      .send()
      .await
      .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    let status = resp.status();
    debug!(url, status = status.as_u16(), "push response");
    if status.is_success() {
      return Ok(());
    }
    let message = resp.text().await.unwrap_or_default();
    Err(classify(status, message))
  }
}

/// Map a non-success push-service status to a delivery error. 404 and 410
/// mean the subscription no longer exists.
fn classify(status: StatusCode, message: String) -> DeliveryError {
  match status {
    StatusCode::NOT_FOUND | StatusCode::GONE => DeliveryError::Gone(status.to_string()),
    _ => DeliveryError::Rejected { status: status.as_u16(), message },
  }
}
