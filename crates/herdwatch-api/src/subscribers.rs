//! Handlers for the subscription lifecycle.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/subscribe` | Body: `{"subscription":{"endpoint":..},"location":{..},"user_info":{..}}` |
//! | `POST` | `/unsubscribe` | Body: `{"subscription_id":"sub_.."}`; soft delete |
//! | `PUT`  | `/subscribers/{id}/location` | Body: `{"latitude":..,"longitude":..}`; 404 unless active |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use herdwatch_core::{
  geo::Coordinate,
  store::Store,
  subscriber::{NotificationTarget, Subscriber},
  transport::NotificationTransport,
};
use herdwatch_engine::dispatch::{Recipient, welcome_payload};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

// ─── Subscribe ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct UserInfo {
  pub name:  Option<String>,
  pub phone: Option<String>,
  pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
  pub subscription: Option<NotificationTarget>,
  #[serde(default, alias = "userInfo")]
  pub user_info:    UserInfo,
  pub location:     Option<Coordinate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
  pub subscription_id: String,
  pub message:         String,
}

/// `POST /subscribe`
///
/// Creates an active subscriber and sends the welcome notification in the
/// background; delivery problems do not fail the request.
pub async fn subscribe<S, T>(
  State(state): State<ApiState<S, T>>,
  Json(body): Json<SubscribeBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let target = body
    .subscription
    .filter(|t| !t.endpoint.trim().is_empty())
    .ok_or_else(|| ApiError::BadRequest("invalid subscription data".into()))?;
  let location = body
    .location
    .ok_or_else(|| ApiError::BadRequest("location data required".into()))?;
  location.validate()?;

  let UserInfo { name, phone, email } = body.user_info;
  let mut subscriber = Subscriber::new(
    format!("sub_{}", Uuid::new_v4().simple()),
    name.unwrap_or_default(),
    target,
    Some(location),
    Utc::now(),
  );
  subscriber.phone = phone.filter(|p| !p.trim().is_empty());
  subscriber.email = email.filter(|e| !e.trim().is_empty());

  let subscription_id = subscriber.id.clone();
  state
    .monitor
    .store()
    .upsert_subscriber(subscriber.clone())
    .await
    .map_err(ApiError::store)?;
  info!(subscriber_id = %subscription_id, "new subscription");

  let monitor = state.monitor.clone();
  tokio::spawn(async move {
    let payload = welcome_payload(Utc::now());
    if let Err(e) = monitor
      .dispatcher()
      .send_payload(Recipient::Subscriber(&subscriber), &payload)
      .await
    {
      warn!(subscriber_id = %subscriber.id, error = %e, "welcome notification failed");
    }
  });

  Ok((
    StatusCode::CREATED,
    Json(SubscribeResponse {
      subscription_id,
      message: "Successfully subscribed to elephant alerts".into(),
    }),
  ))
}

// ─── Unsubscribe ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
  #[serde(alias = "subscriptionId")]
  pub subscription_id: Option<String>,
}

/// `POST /unsubscribe`
pub async fn unsubscribe<S, T>(
  State(state): State<ApiState<S, T>>,
  Json(body): Json<UnsubscribeBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let id = body
    .subscription_id
    .filter(|id| !id.is_empty())
    .ok_or_else(|| ApiError::BadRequest("subscription id required".into()))?;

  let removed = state
    .monitor
    .store()
    .remove_subscriber(&id, Utc::now())
    .await
    .map_err(ApiError::store)?;
  if !removed {
    return Err(ApiError::NotFound(format!("subscriber {id} not found")));
  }

  info!(subscriber_id = %id, "unsubscribed");
  Ok(Json(serde_json::json!({ "message": "Successfully unsubscribed" })))
}

// ─── Location ─────────────────────────────────────────────────────────────────

/// `PUT /subscribers/{id}/location`
pub async fn update_location<S, T>(
  State(state): State<ApiState<S, T>>,
  Path(id): Path<String>,
  Json(location): Json<Coordinate>,
) -> Result<StatusCode, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  location.validate()?;
  let updated = state
    .monitor
    .store()
    .update_subscriber_location(&id, location, Utc::now())
    .await
    .map_err(ApiError::store)?;
  if !updated {
    return Err(ApiError::NotFound(format!("active subscriber {id} not found")));
  }
  Ok(StatusCode::NO_CONTENT)
}
