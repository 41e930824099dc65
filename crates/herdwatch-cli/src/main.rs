//! `herdwatch`: operator CLI for a running herdwatch server.
//!
//! # Usage
//!
//! ```text
//! herdwatch --url http://localhost:3000 stats
//! herdwatch check
//! herdwatch report-location tusker 11.91 75.61
//! herdwatch set-geofence tusker "11.8,75.5|11.8,75.7|12.0,75.7|12.0,75.5|"
//! herdwatch --config ~/.config/herdwatch/cli.toml alerts --limit 20
//! ```

mod client;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiConfig};
use herdwatch_core::{geo::Coordinate, location::RawLocationSample};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://localhost:3000";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "herdwatch", about = "Operator CLI for the herdwatch alert server")]
struct Args {
  /// Path to a TOML config file (`url = "..."`).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the herdwatch server (default: http://localhost:3000).
  #[arg(long, env = "HERDWATCH_URL")]
  url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
  /// Subscriber, subject and alert counts.
  Stats,
  /// The most recent alerts, newest first.
  Alerts {
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
  },
  /// Tracked subjects and their latest positions.
  Subjects,
  /// Run one proximity and geofence cycle now.
  Check,
  /// Send a test notification to one subscriber, or to all of them.
  Test { subscription_id: Option<String> },
  /// Register a push endpoint at a location.
  #[command(allow_negative_numbers = true)]
  Subscribe {
    endpoint:  String,
    latitude:  f64,
    longitude: f64,
    #[arg(long)]
    name:      Option<String>,
  },
  Unsubscribe { subscription_id: String },
  /// Record a tracking sample for a subject (timestamped now).
  #[command(allow_negative_numbers = true)]
  ReportLocation {
    subject_id: String,
    latitude:   f64,
    longitude:  f64,
  },
  /// Attach a boundary given as `lat,lng|lat,lng|...`.
  SetGeofence { subject_id: String, boundary: String },
  ClearGeofence { subject_id: String },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url: String,
}

/// CLI flag (or `HERDWATCH_URL`), then the config file, then the default.
fn resolve_url(flag: Option<String>, file: &ConfigFile) -> String {
  flag
    .or_else(|| (!file.url.is_empty()).then(|| file.url.clone()))
    .unwrap_or_else(|| DEFAULT_URL.to_string())
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  // Load config file if provided.
  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  let client = ApiClient::new(ApiConfig { base_url: resolve_url(args.url, &file_cfg) })?;
  run(&client, args.command).await
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
  match command {
    Command::Stats => {
      let stats = client.stats().await?;
      println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Command::Alerts { limit } => {
      for record in client.alerts(limit).await? {
        let distance = record
          .distance_km
          .map(|d| format!("{d:.2} km"))
          .unwrap_or_else(|| "-".to_string());
        let status = if record.delivered { "delivered" } else { "failed" };
        println!("{}  {:<40}  {distance:>9}  {status}", record.fired_at, record.key.to_string());
      }
    }
    Command::Subjects => {
      for s in client.subjects().await? {
        let latest = s
          .latest
          .map(|l| {
            format!("{:.5},{:.5} at {}", l.coordinate.latitude, l.coordinate.longitude, l.timestamp)
          })
          .unwrap_or_else(|| "no location".to_string());
        let fence = if s.has_geofence { "geofenced" } else { "" };
        println!("{:<20}  {:>5} samples  {latest}  {fence}", s.id, s.sample_count);
      }
    }
    Command::Check => {
      let report = client.check().await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Test { subscription_id } => {
      let result = client.test_notification(subscription_id.as_deref()).await?;
      println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Command::Subscribe { endpoint, latitude, longitude, name } => {
      let location = Coordinate::new(latitude, longitude)?;
      let id = client.subscribe(&endpoint, location, name.as_deref()).await?;
      println!("{id}");
    }
    Command::Unsubscribe { subscription_id } => {
      client.unsubscribe(&subscription_id).await?;
      println!("unsubscribed {subscription_id}");
    }
    Command::ReportLocation { subject_id, latitude, longitude } => {
      let sample = RawLocationSample::new(Coordinate::new(latitude, longitude)?, Utc::now());
      let stored = client.report_location(&subject_id, &sample).await?;
      println!("{subject_id} at {}", stored.timestamp);
    }
    Command::SetGeofence { subject_id, boundary } => {
      client.set_geofence(&subject_id, &boundary).await?;
      println!("geofence set for {subject_id}");
    }
    Command::ClearGeofence { subject_id } => {
      client.clear_geofence(&subject_id).await?;
      println!("geofence cleared for {subject_id}");
    }
  }
  Ok(())
}
