//! [`SqliteStore`]: the SQLite implementation of the herdwatch stores.

use std::{collections::HashMap, path::Path};

use chrono::{DateTime, Utc};
use herdwatch_core::{
  alert::{AlertKey, AlertRecord},
  geo::Coordinate,
  geofence::Geofence,
  location::{LocationHistory, RawLocationSample},
  membership::MembershipState,
  store::{AlertStore, SubjectStore, SubscriberStore},
  subject::Subject,
  subscriber::{Subscriber, SubscriberStatus},
};
use rusqlite::OptionalExtension as _;
use tracing::warn;

use crate::{
  Result,
  encode::{
    ALERT_COLUMNS, RawAlert, RawMembership, RawSample, RawSubject, RawSubscriber,
    SUBSCRIBER_COLUMNS, decode_subject, encode_dt, encode_geofence, encode_sample,
    encode_scope, encode_subject,
  },
  error::Error,
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Herdwatch state backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store. Nothing survives the process.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run raw SQL, bypassing the encoders.
  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Load subject rows (all, or just `only`) with their samples.
  async fn load_subjects(&self, only: Option<String>) -> Result<Vec<Subject>> {
    let (raws, samples): (Vec<RawSubject>, Vec<RawSample>) = self
      .conn
      .call(move |conn| {
        let (raws, samples) = if let Some(id) = only {
          let mut stmt = conn.prepare(
            "SELECT subject_id, geofence_json, legacy_json FROM subjects WHERE subject_id = ?1",
          )?;
          let raws = stmt
            .query_map(rusqlite::params![id], RawSubject::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          let mut stmt = conn.prepare(
            "SELECT subject_id, sample_json, legacy FROM locations
             WHERE subject_id = ?1 ORDER BY location_id",
          )?;
          let samples = stmt
            .query_map(rusqlite::params![id], RawSample::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          (raws, samples)
        } else {
          let mut stmt = conn.prepare(
            "SELECT subject_id, geofence_json, legacy_json FROM subjects ORDER BY subject_id",
          )?;
          let raws = stmt
            .query_map([], RawSubject::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          let mut stmt = conn.prepare(
            "SELECT subject_id, sample_json, legacy FROM locations ORDER BY location_id",
          )?;
          let samples = stmt
            .query_map([], RawSample::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          (raws, samples)
        };
        Ok((raws, samples))
      })
      .await?;

    let mut by_subject: HashMap<String, Vec<RawSample>> = HashMap::new();
    for s in samples {
      by_subject.entry(s.subject_id.clone()).or_default().push(s);
    }
    // An undecodable subject is left out rather than failing the whole load.
    Ok(
      raws
        .into_iter()
        .filter_map(|raw| {
          let id = raw.subject_id.clone();
          let samples = by_subject.remove(&id).unwrap_or_default();
          decode_subject(raw, samples)
            .inspect_err(|e| warn!(subject_id = %id, error = %e, "skipping undecodable subject"))
            .ok()
        })
        .collect(),
    )
  }
}

// ─── SubjectStore ────────────────────────────────────────────────────────────

impl SubjectStore for SqliteStore {
  type Error = Error;

  async fn get_subjects(&self) -> Result<Vec<Subject>> { self.load_subjects(None).await }

  async fn get_subject(&self, id: &str) -> Result<Option<Subject>> {
    Ok(self.load_subjects(Some(id.to_owned())).await?.pop())
  }

  async fn get_location_history(&self, id: &str) -> Result<LocationHistory> {
    Ok(
      self
        .get_subject(id)
        .await?
        .map(|s| s.locations)
        .unwrap_or_default(),
    )
  }

  async fn append_location(&self, id: &str, sample: RawLocationSample) -> Result<()> {
    let id = id.to_owned();
    let sample_json = encode_sample(&sample)?;
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO subjects (subject_id, created_at) VALUES (?1, ?2)",
          rusqlite::params![id, now],
        )?;
        // A legacy single location becomes the first sample of the history.
        tx.execute(
          "INSERT INTO locations (subject_id, sample_json, legacy)
           SELECT subject_id, legacy_json, 1 FROM subjects
           WHERE subject_id = ?1 AND legacy_json IS NOT NULL",
          rusqlite::params![id],
        )?;
        tx.execute(
          "UPDATE subjects SET legacy_json = NULL WHERE subject_id = ?1",
          rusqlite::params![id],
        )?;
        tx.execute(
          "INSERT INTO locations (subject_id, sample_json) VALUES (?1, ?2)",
          rusqlite::params![id, sample_json],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_geofence(&self, id: &str, geofence: Option<Geofence>) -> Result<()> {
    let id = id.to_owned();
    let geofence_json = geofence.as_ref().map(encode_geofence).transpose()?;
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO subjects (subject_id, geofence_json, created_at) VALUES (?1, ?2, ?3)
           ON CONFLICT (subject_id) DO UPDATE SET geofence_json = excluded.geofence_json",
          rusqlite::params![id, geofence_json, now],
        )?;
        tx.execute("DELETE FROM membership WHERE subject_id = ?1", rusqlite::params![id])?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn upsert_subject(&self, subject: Subject) -> Result<()> {
    let columns = encode_subject(&subject)?;
    let id = subject.id;
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM membership WHERE subject_id = ?1 AND EXISTS (
             SELECT 1 FROM subjects WHERE subject_id = ?1 AND geofence_json IS NOT ?2
           )",
          rusqlite::params![id, columns.geofence_json],
        )?;
        tx.execute(
          "INSERT INTO subjects (subject_id, geofence_json, legacy_json, created_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (subject_id) DO UPDATE SET
             geofence_json = excluded.geofence_json,
             legacy_json   = excluded.legacy_json",
          rusqlite::params![id, columns.geofence_json, columns.legacy_json, now],
        )?;
        tx.execute("DELETE FROM locations WHERE subject_id = ?1", rusqlite::params![id])?;
        {
          let mut stmt =
            tx.prepare("INSERT INTO locations (subject_id, sample_json) VALUES (?1, ?2)")?;
          for sample_json in &columns.samples {
            stmt.execute(rusqlite::params![id, sample_json])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── SubscriberStore ─────────────────────────────────────────────────────────

impl SubscriberStore for SqliteStore {
  type Error = Error;

  async fn active_subscribers(&self) -> Result<Vec<Subscriber>> {
    let status = SubscriberStatus::Active.as_ref().to_owned();
    let raws: Vec<RawSubscriber> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE status = ?1 ORDER BY subscriber_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![status], RawSubscriber::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(
      raws
        .into_iter()
        .filter_map(|raw| {
          let id = raw.subscriber_id.clone();
          raw
            .into_subscriber()
            .inspect_err(|e| {
              warn!(subscriber_id = %id, error = %e, "skipping undecodable subscriber")
            })
            .ok()
        })
        .collect(),
    )
  }

  async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>> {
    let id = id.to_owned();
    let raw: Option<RawSubscriber> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE subscriber_id = ?1"),
              rusqlite::params![id],
              RawSubscriber::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSubscriber::into_subscriber).transpose()
  }

  async fn upsert_subscriber(&self, subscriber: Subscriber) -> Result<()> {
    let r = RawSubscriber::encode(&subscriber)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subscribers (
             subscriber_id, name, phone, email, latitude, longitude,
             status, endpoint, keys_json, subscribed_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
           ON CONFLICT (subscriber_id) DO UPDATE SET
             name       = excluded.name,
             phone      = excluded.phone,
             email      = excluded.email,
             latitude   = excluded.latitude,
             longitude  = excluded.longitude,
             status     = excluded.status,
             endpoint   = excluded.endpoint,
             keys_json  = excluded.keys_json,
             updated_at = excluded.updated_at",
          rusqlite::params![
            r.subscriber_id,
            r.name,
            r.phone,
            r.email,
            r.latitude,
            r.longitude,
            r.status,
            r.endpoint,
            r.keys_json,
            r.subscribed_at,
            r.updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn remove_subscriber(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
    let id = id.to_owned();
    let at = encode_dt(at);
    let status = SubscriberStatus::Inactive.as_ref().to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subscribers SET status = ?2, updated_at = ?3 WHERE subscriber_id = ?1",
          rusqlite::params![id, status, at],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn update_subscriber_location(
    &self,
    id: &str,
    location: Coordinate,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let id = id.to_owned();
    let at = encode_dt(at);
    let active = SubscriberStatus::Active.as_ref().to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subscribers SET latitude = ?2, longitude = ?3, updated_at = ?4
           WHERE subscriber_id = ?1 AND status = ?5",
          rusqlite::params![id, location.latitude, location.longitude, at, active],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn subscriber_counts(&self) -> Result<(usize, usize)> {
    let active = SubscriberStatus::Active.as_ref().to_owned();
    let (total, active): (i64, i64) = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*), COALESCE(SUM(status = ?1), 0) FROM subscribers",
          rusqlite::params![active],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
      })
      .await?;
    Ok((count(total), count(active)))
  }
}

// ─── AlertStore ──────────────────────────────────────────────────────────────

impl AlertStore for SqliteStore {
  type Error = Error;

  async fn last_alert(&self, key: &AlertKey) -> Result<Option<AlertRecord>> {
    let scope = encode_scope(&key.scope);
    let subject_id = key.subject_id.clone();
    let kind = key.kind.as_ref().to_owned();
    let raw: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ALERT_COLUMNS} FROM recent_alerts
                 WHERE scope = ?1 AND subject_id = ?2 AND kind = ?3"
              ),
              rusqlite::params![scope, subject_id, kind],
              RawAlert::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawAlert::into_record).transpose()
  }

  async fn record_alert(&self, record: AlertRecord) -> Result<()> {
    let r = RawAlert::encode(&record);
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO recent_alerts (scope, subject_id, kind, distance_km, fired_at, delivered)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (scope, subject_id, kind) DO UPDATE SET
             distance_km = excluded.distance_km,
             fired_at    = excluded.fired_at,
             delivered   = excluded.delivered",
          rusqlite::params![r.scope, r.subject_id, r.kind, r.distance_km, r.fired_at, r.delivered],
        )?;
        tx.execute(
          "INSERT INTO alert_log (scope, subject_id, kind, distance_km, fired_at, delivered)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![r.scope, r.subject_id, r.kind, r.distance_km, r.fired_at, r.delivered],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn membership(&self, subject_id: &str) -> Result<Option<MembershipState>> {
    let id = subject_id.to_owned();
    let raw: Option<RawMembership> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT subject_id, last_known_inside, evaluated_at, sample_at FROM membership
               WHERE subject_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawMembership {
                  subject_id:        row.get(0)?,
                  last_known_inside: row.get(1)?,
                  evaluated_at:      row.get(2)?,
                  sample_at:         row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawMembership::into_state).transpose()
  }

  async fn save_membership(&self, state: MembershipState) -> Result<()> {
    let at = encode_dt(state.evaluated_at);
    let sample_at = encode_dt(state.sample_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO membership (subject_id, last_known_inside, evaluated_at, sample_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (subject_id) DO UPDATE SET
             last_known_inside = excluded.last_known_inside,
             evaluated_at      = excluded.evaluated_at,
             sample_at         = excluded.sample_at",
          rusqlite::params![state.subject_id, state.last_known_inside, at, sample_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawAlert> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ALERT_COLUMNS} FROM alert_log ORDER BY alert_id DESC LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit], RawAlert::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAlert::into_record).collect()
  }

  async fn alert_count(&self) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM alert_log", [], |row| row.get(0))?))
      .await?;
    Ok(count(n))
  }
}

fn count(n: i64) -> usize { usize::try_from(n).unwrap_or_default() }
