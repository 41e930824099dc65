//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Engine(#[from] herdwatch_engine::Error),
}

impl ApiError {
  /// Box a store error. Usable directly as a `map_err` argument.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

impl From<herdwatch_core::Error> for ApiError {
  fn from(e: herdwatch_core::Error) -> Self { Self::BadRequest(e.to_string()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    use herdwatch_engine::Error as EngineError;

    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Engine(e) => match e {
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Delivery(_) => StatusCode::BAD_GATEWAY,
        EngineError::TransientStore { .. } | EngineError::Configuration(_) => {
          StatusCode::INTERNAL_SERVER_ERROR
        }
      },
    };
    let message = match &self {
      ApiError::NotFound(m) | ApiError::BadRequest(m) => m.clone(),
      other => other.to_string(),
    };
    if status.is_server_error() {
      warn!(status = status.as_u16(), error = %message, "request failed");
    }
    (status, Json(json!({ "error": message }))).into_response()
  }
}
