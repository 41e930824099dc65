//! Handlers for `/subjects` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/subjects` | Summaries, no full history |
//! | `GET`    | `/subjects/{id}` | 404 if not found |
//! | `POST`   | `/subjects/{id}/locations` | Body: a location sample; creates the subject on first report |
//! | `PUT`    | `/subjects/{id}/geofence` | Body: `{"vertices":[..]}`, a vertex array, or `"lat,lng\|lat,lng\|.."` |
//! | `DELETE` | `/subjects/{id}/geofence` | 404 if the subject is unknown |
//!
//! Location appends and geofence changes are published to the update feed,
//! so the reactive driver re-evaluates the subject.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use herdwatch_core::{
  geo::Coordinate,
  geofence::Geofence,
  location::RawLocationSample,
  store::Store,
  subject::{Subject, SubjectSummary},
  transport::NotificationTransport,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{ApiState, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /subjects`
pub async fn list<S, T>(
  State(state): State<ApiState<S, T>>,
) -> Result<Json<Vec<SubjectSummary>>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let subjects = state
    .monitor
    .store()
    .get_subjects()
    .await
    .map_err(ApiError::store)?;
  Ok(Json(subjects.iter().map(SubjectSummary::from).collect()))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /subjects/{id}`
pub async fn get_one<S, T>(
  State(state): State<ApiState<S, T>>,
  Path(id): Path<String>,
) -> Result<Json<Subject>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let subject = state
    .monitor
    .store()
    .get_subject(&id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("subject {id} not found")))?;
  Ok(Json(subject))
}

// ─── Locations ────────────────────────────────────────────────────────────────

/// `POST /subjects/{id}/locations`
///
/// A sample without a timestamp is stamped with the time of receipt.
pub async fn append_location<S, T>(
  State(state): State<ApiState<S, T>>,
  Path(id): Path<String>,
  Json(mut sample): Json<RawLocationSample>,
) -> Result<impl IntoResponse, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  if sample.timestamp.is_none() {
    sample.timestamp = Some(Utc::now());
  }
  let resolved = sample.resolve().ok_or_else(|| {
    ApiError::BadRequest("sample needs an in-range latitude and longitude".into())
  })?;

  state
    .monitor
    .store()
    .append_location(&id, sample)
    .await
    .map_err(ApiError::store)?;
  let receivers = state.feed.publish(id.as_str());
  debug!(subject_id = %id, receivers, "location appended");

  Ok((StatusCode::CREATED, Json(resolved)))
}

// ─── Geofence ─────────────────────────────────────────────────────────────────

/// Accepted geofence bodies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GeofenceBody {
  Fence {
    vertices:   Vec<Coordinate>,
    #[serde(default)]
    created_by: Option<String>,
  },
  Vertices(Vec<Coordinate>),
  /// The pipe-delimited format saved by the ranger dashboard.
  Legacy(String),
}

impl GeofenceBody {
  fn into_geofence(self) -> Result<Geofence, ApiError> {
    let geofence = match self {
      Self::Fence { vertices, created_by } => Geofence { created_by, ..Geofence::new(vertices) },
      Self::Vertices(vertices) => Geofence::new(vertices),
      Self::Legacy(s) => Geofence::parse_legacy(&s)?,
    };
    geofence.polygon()?;
    Ok(geofence)
  }
}

/// `PUT /subjects/{id}/geofence`
pub async fn set_geofence<S, T>(
  State(state): State<ApiState<S, T>>,
  Path(id): Path<String>,
  Json(body): Json<GeofenceBody>,
) -> Result<Json<Geofence>, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let geofence = Geofence { created_at: Some(Utc::now()), ..body.into_geofence()? };
  state
    .monitor
    .store()
    .set_geofence(&id, Some(geofence.clone()))
    .await
    .map_err(ApiError::store)?;
  state.feed.publish(id.as_str());
  info!(subject_id = %id, vertices = geofence.vertices.len(), "geofence set");
  Ok(Json(geofence))
}

/// `DELETE /subjects/{id}/geofence`
pub async fn clear_geofence<S, T>(
  State(state): State<ApiState<S, T>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
  S: Store + 'static,
  T: NotificationTransport + 'static,
{
  let store = state.monitor.store();
  if store.get_subject(&id).await.map_err(ApiError::store)?.is_none() {
    return Err(ApiError::NotFound(format!("subject {id} not found")));
  }
  store.set_geofence(&id, None).await.map_err(ApiError::store)?;
  info!(subject_id = %id, "geofence cleared");
  Ok(StatusCode::NO_CONTENT)
}
