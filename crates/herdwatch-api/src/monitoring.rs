//! Health, manual monitoring and reporting endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/` | Health document (mounted outside `/api`) |
//! | `POST` | `/check-proximity` | Runs one polled cycle; returns its report |
//! | `POST` | `/test-notification` | Body: `{}` for all active subscribers, or `{"subscription_id":".."}` |
//! | `GET`  | `/stats` | Counts and uptime |
//! | `GET`  | `/alerts` | Optional `?limit=` (default 100, max 1000); newest first |

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{DateTime, Utc};
use herdwatch_core::{
  alert::AlertRecord,
  store::Store,
  subscriber::Subscriber,
  transport::NotificationTransport,
};
use herdwatch_engine::{
  CycleReport,
  dispatch::{Recipient, test_payload},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{ApiState, error::ApiError};

const DEFAULT_ALERT_LIMIT: usize = 100;
const MAX_ALERT_LIMIT: usize = 1000;

// ─── Health ───────────────────────────────────────────────────────────────────

/// `GET /`
pub async fn health() -> Json<Value> {
  Json(json!({
    "service": "herdwatch",
    "status": "running",
    "timestamp": Utc::now(),
    "endpoints": {
      "health": "GET /",
      "subscribe": "POST /api/subscribe",
      "unsubscribe": "POST /api/unsubscribe",
      "subscriber_location": "PUT /api/subscribers/{id}/location",
      "subjects": "GET /api/subjects",
      "subject_locations": "POST /api/subjects/{id}/locations",
      "geofence": "PUT|DELETE /api/subjects/{id}/geofence",
      "test_notification": "POST /api/test-notification",
      "check_proximity": "POST /api/check-proximity",
      "stats": "GET /api/stats",
      "alerts": "GET /api/alerts",
    },
  }))
}

// ─── Check ────────────────────────────────────────────────────────────────────

/// `POST /check-proximity`
pub async fn check_proximity<S, T>(
  State(state): State<ApiState<S, T>>,
) -> Result<Json<CycleReport>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  info!("manual proximity check requested");
  let report = state.monitor.run_cycle().await?;
  Ok(Json(report))
}

// ─── Test notification ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TestBody {
  #[serde(default, alias = "subscriptionId")]
  pub subscription_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
  pub subscription_id: String,
  pub success:         bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:           Option<String>,
  /// The push endpoint is gone; the subscriber has been deactivated.
  #[serde(default)]
  pub expired:         bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestResponse {
  pub message: String,
  pub results: Vec<TestResult>,
}

/// `POST /test-notification`
pub async fn test_notification<S, T>(
  State(state): State<ApiState<S, T>>,
  Json(body): Json<TestBody>,
) -> Result<Json<TestResponse>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let store = state.monitor.store();
  let subscribers: Vec<Subscriber> = match body.subscription_id {
    Some(id) => store
      .get_subscriber(&id)
      .await
      .map_err(ApiError::store)?
      .filter(Subscriber::is_active)
      .into_iter()
      .collect(),
    None => store.active_subscribers().await.map_err(ApiError::store)?,
  };
  if subscribers.is_empty() {
    return Err(ApiError::NotFound("no subscriptions found".into()));
  }

  let payload = test_payload(Utc::now());
  let mut results = Vec::with_capacity(subscribers.len());
  for subscriber in &subscribers {
    let outcome = state
      .monitor
      .dispatcher()
      .send_payload(Recipient::Subscriber(subscriber), &payload)
      .await;
    let expired = outcome.as_ref().is_err_and(|e| e.is_gone());
    if expired {
      warn!(subscriber_id = %subscriber.id, "push endpoint gone; deactivating subscriber");
      store
        .remove_subscriber(&subscriber.id, Utc::now())
        .await
        .map_err(ApiError::store)?;
    }
    results.push(TestResult {
      subscription_id: subscriber.id.clone(),
      success: outcome.is_ok(),
      error: outcome.err().map(|e| e.to_string()),
      expired,
    });
  }

  let sent = results.iter().filter(|r| r.success).count();
  Ok(Json(TestResponse {
    message: format!("Test notifications sent to {sent}/{} subscribers", results.len()),
    results,
  }))
}

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
  pub total_subscribers:  usize,
  pub active_subscribers: usize,
  pub total_subjects:     usize,
  pub total_alerts:       usize,
  pub uptime_seconds:     i64,
  pub timestamp:          DateTime<Utc>,
}

/// `GET /stats`
pub async fn stats<S, T>(State(state): State<ApiState<S, T>>) -> Result<Json<Stats>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let store = state.monitor.store();
  let (total_subscribers, active_subscribers) =
    store.subscriber_counts().await.map_err(ApiError::store)?;
  let total_subjects = store.get_subjects().await.map_err(ApiError::store)?.len();
  let total_alerts = store.alert_count().await.map_err(ApiError::store)?;
  let now = Utc::now();

  Ok(Json(Stats {
    total_subscribers,
    active_subscribers,
    total_subjects,
    total_alerts,
    uptime_seconds: (now - state.started_at).num_seconds(),
    timestamp: now,
  }))
}

// ─── Alerts ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AlertParams {
  pub limit: Option<usize>,
}

/// `GET /alerts[?limit=<n>]`
pub async fn alerts<S, T>(
  State(state): State<ApiState<S, T>>,
  Query(params): Query<AlertParams>,
) -> Result<Json<Vec<AlertRecord>>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let limit = params.limit.unwrap_or(DEFAULT_ALERT_LIMIT).min(MAX_ALERT_LIMIT);
  let records = state
    .monitor
    .store()
    .recent_alerts(limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}
