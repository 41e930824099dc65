//! Deployment wiring for herdwatch: configuration, the HTTP push transport
//! and signal handling. The binary in `main.rs` assembles these with the
//! engine, the SQLite store and the REST API.

pub mod push;
pub mod shutdown;

use std::path::{Path, PathBuf};

use config::{ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use herdwatch_engine::{Drive, EngineConfig};
use serde::Deserialize;

pub use push::HttpPushTransport;

/// Prefix of the environment variables layered over the config file, e.g.
/// `HERDWATCH_PORT=8080` or `HERDWATCH_ENGINE__PROXIMITY_RADIUS_KM=3`.
pub const ENV_PREFIX: &str = "HERDWATCH";

/// Store path that selects a throwaway in-memory database.
pub const IN_MEMORY: &str = ":memory:";

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and the
/// environment. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:            String,
  pub port:            u16,
  pub store_path:      PathBuf,
  /// Webhook receiving geofence broadcasts (the ranger dashboard). Without
  /// it broadcasts fall through to the log.
  pub broadcast_url:   Option<String>,
  pub push_timeout_ms: u64,
  pub drive:           Drive,
  pub engine:          EngineConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:            "0.0.0.0".to_string(),
      port:            3000,
      store_path:      PathBuf::from("herdwatch.db"),
      broadcast_url:   None,
      push_timeout_ms: 10_000,
      drive:           Drive::default(),
      engine:          EngineConfig::default(),
    }
  }
}

impl ServerConfig {
  /// Layer `HERDWATCH_*` variables over `builder`'s sources and
  /// deserialise.
  pub fn load(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
    builder
      .add_source(
        Environment::with_prefix(ENV_PREFIX)
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  /// `store_path` with a leading `~` expanded; `None` for an in-memory
  /// store.
  pub fn resolved_store_path(&self) -> Option<PathBuf> {
    (self.store_path.as_os_str() != IN_MEMORY).then(|| expand_tilde(&self.store_path))
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
