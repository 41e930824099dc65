//! SQL schema for the herdwatch SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subjects (
    subject_id    TEXT PRIMARY KEY,
    geofence_json TEXT,            -- Geofence as JSON or NULL
    legacy_json   TEXT,            -- single legacy {lat, lng} location or NULL
    created_at    TEXT NOT NULL
);

-- Location samples are append-only.
CREATE TABLE IF NOT EXISTS locations (
    location_id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id  TEXT    NOT NULL REFERENCES subjects(subject_id),
    sample_json TEXT    NOT NULL,
    legacy      INTEGER NOT NULL DEFAULT 0   -- 1: sample_json is a promoted legacy location
);

CREATE TABLE IF NOT EXISTS subscribers (
    subscriber_id TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    phone         TEXT,
    email         TEXT,
    latitude      REAL,
    longitude     REAL,
    status        TEXT NOT NULL,   -- 'active' | 'inactive'
    endpoint      TEXT NOT NULL,
    keys_json     TEXT,
    subscribed_at TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

-- Latest alert per dedup key; upserted.
CREATE TABLE IF NOT EXISTS recent_alerts (
    scope       TEXT    NOT NULL,  -- 'global' | 'subscriber:<id>'
    subject_id  TEXT    NOT NULL,
    kind        TEXT    NOT NULL,
    distance_km REAL,
    fired_at    TEXT    NOT NULL,
    delivered   INTEGER NOT NULL,
    PRIMARY KEY (scope, subject_id, kind)
);

-- Every alert ever fired. No UPDATE or DELETE is issued against this table.
CREATE TABLE IF NOT EXISTS alert_log (
    alert_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    scope       TEXT    NOT NULL,
    subject_id  TEXT    NOT NULL,
    kind        TEXT    NOT NULL,
    distance_km REAL,
    fired_at    TEXT    NOT NULL,
    delivered   INTEGER NOT NULL
);

-- Dropped whenever the subject's geofence changes.
CREATE TABLE IF NOT EXISTS membership (
    subject_id        TEXT PRIMARY KEY,
    last_known_inside INTEGER NOT NULL,
    evaluated_at      TEXT    NOT NULL,
    sample_at         TEXT    NOT NULL   -- timestamp of the sample the state came from
);

CREATE INDEX IF NOT EXISTS locations_subject_idx ON locations(subject_id);
CREATE INDEX IF NOT EXISTS subscribers_status_idx ON subscribers(status);

PRAGMA user_version = 1;
";
