//! Async HTTP client wrapping the herdwatch JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use herdwatch_core::{
  alert::AlertRecord,
  geo::Coordinate,
  location::{LocationSample, RawLocationSample},
  subject::SubjectSummary,
};
use herdwatch_engine::CycleReport;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

/// Connection settings for the herdwatch API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
}

/// Async HTTP client for the herdwatch JSON REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.config.base_url.trim_end_matches('/'), path)
  }

  /// Send `req` and fail on a non-success status, surfacing the server's
  /// `{"error": ..}` message when there is one.
  async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
    debug!(request = what, "sending");
    let resp = req.send().await.with_context(|| format!("{what} failed"))?;
    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }
    let message = resp
      .json::<Value>()
      .await
      .ok()
      .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
      .unwrap_or_default();
    Err(anyhow!("{what} → {status} {message}"))
  }

  async fn json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
    self
      .send(req, what)
      .await?
      .json()
      .await
      .with_context(|| format!("deserialising response to {what}"))
  }

  // ── Monitoring ────────────────────────────────────────────────────────────

  /// `GET /api/stats`
  pub async fn stats(&self) -> Result<Value> {
    self.json(self.client.get(self.url("/stats")), "GET /stats").await
  }

  /// `GET /api/alerts?limit=<n>`
  pub async fn alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
    let req = self.client.get(self.url("/alerts")).query(&[("limit", limit)]);
    self.json(req, "GET /alerts").await
  }

  /// `POST /api/check-proximity`
  pub async fn check(&self) -> Result<CycleReport> {
    self
      .json(self.client.post(self.url("/check-proximity")), "POST /check-proximity")
      .await
  }

  /// `POST /api/test-notification`
  pub async fn test_notification(&self, subscription_id: Option<&str>) -> Result<Value> {
    let req = self
      .client
      .post(self.url("/test-notification"))
      .json(&json!({ "subscription_id": subscription_id }));
    self.json(req, "POST /test-notification").await
  }

  // ── Subscribers ───────────────────────────────────────────────────────────

  /// `POST /api/subscribe`; returns the new subscription id.
  pub async fn subscribe(
    &self,
    endpoint: &str,
    location: Coordinate,
    name: Option<&str>,
  ) -> Result<String> {
    let req = self.client.post(self.url("/subscribe")).json(&json!({
      "subscription": { "endpoint": endpoint },
      "location": location,
      "user_info": { "name": name },
    }));
    let body: Value = self.json(req, "POST /subscribe").await?;
    body
      .get("subscription_id")
      .and_then(Value::as_str)
      .map(str::to_owned)
      .ok_or_else(|| anyhow!("POST /subscribe: no subscription_id in response"))
  }

  /// `POST /api/unsubscribe`
  pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
    let req = self
      .client
      .post(self.url("/unsubscribe"))
      .json(&json!({ "subscription_id": subscription_id }));
    self.send(req, "POST /unsubscribe").await.map(drop)
  }

  // ── Subjects ──────────────────────────────────────────────────────────────

  /// `GET /api/subjects`
  pub async fn subjects(&self) -> Result<Vec<SubjectSummary>> {
    self.json(self.client.get(self.url("/subjects")), "GET /subjects").await
  }

  /// `POST /api/subjects/<id>/locations`
  pub async fn report_location(
    &self,
    subject_id: &str,
    sample: &RawLocationSample,
  ) -> Result<LocationSample> {
    let req = self
      .client
      .post(self.url(&format!("/subjects/{subject_id}/locations")))
      .json(sample);
    self.json(req, "POST /subjects/{id}/locations").await
  }

  /// `PUT /api/subjects/<id>/geofence` with the pipe-delimited boundary.
  pub async fn set_geofence(&self, subject_id: &str, boundary: &str) -> Result<()> {
    let req = self
      .client
      .put(self.url(&format!("/subjects/{subject_id}/geofence")))
      .json(boundary);
    self.send(req, "PUT /subjects/{id}/geofence").await.map(drop)
  }

  /// `DELETE /api/subjects/<id>/geofence`
  pub async fn clear_geofence(&self, subject_id: &str) -> Result<()> {
    let req = self
      .client
      .delete(self.url(&format!("/subjects/{subject_id}/geofence")));
    self.send(req, "DELETE /subjects/{id}/geofence").await.map(drop)
  }
}
