//! The notification-delivery collaborator.
//!
//! The engine decides whether and what to send; a [`NotificationTransport`]
//! moves the bytes. A target that no longer exists (HTTP 404/410 from a push
//! service) is reported as [`DeliveryError::Gone`] so the caller can
//! deactivate the subscriber.

use std::future::Future;

use thiserror::Error;

use crate::{alert::AlertPayload, subscriber::NotificationTarget};

/// Where one payload goes.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
  /// A single subscriber's device.
  Device(&'a NotificationTarget),
  /// Everyone watching (e.g. the ranger dashboard).
  Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
  /// The target is permanently gone; stop sending to it.
  #[error("notification target gone: {0}")]
  Gone(String),

  #[error("notification rejected with status {status}: {message}")]
  Rejected { status: u16, message: String },

  #[error("transport failure: {0}")]
  Transport(String),

  #[error("transport cannot deliver to {0}")]
  Unsupported(&'static str),
}

impl DeliveryError {
  pub fn is_gone(&self) -> bool { matches!(self, Self::Gone(_)) }
}

pub trait NotificationTransport: Send + Sync {
  fn send<'a>(
    &'a self,
    target: Target<'a>,
    payload: &'a AlertPayload,
  ) -> impl Future<Output = Result<(), DeliveryError>> + Send + 'a;
}
