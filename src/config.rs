// src/config.rs
//
// =============================================================================
// GRIDMASTER: CONFIGURATION
// =============================================================================
//
// Settings come from environment variables with sensible defaults; the
// CLI may override host and port on top. A malformed value is a startup
// error, never a silent fallback.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// API key for the X-API-Key gate. Unset means open access.
    pub api_key: Option<String>,
    /// Only "memory" is built in; anything else refuses to start.
    pub storage_backend: String,
    /// Reserved for database-backed storage. Unused by the memory backend.
    pub database_url: Option<String>,
    pub log_level: String,
    pub dev_mode: bool,
    /// "*" or a comma-separated origin allow-list.
    pub cors_origins: String,
    pub scheduler_interval_seconds: f64,
    pub node_timeout_seconds: f64,
    pub max_concurrent_jobs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            api_key: None,
            storage_backend: "memory".into(),
            database_url: None,
            log_level: "INFO".into(),
            dev_mode: false,
            cors_origins: "*".into(),
            scheduler_interval_seconds: 5.0,
            node_timeout_seconds: 90.0,
            max_concurrent_jobs: 2,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();

        if let Ok(v) = env::var("MASTER_HOST") {
            settings.host = v;
        }
        if let Ok(v) = env::var("MASTER_PORT") {
            settings.port = v.parse().context("MASTER_PORT must be a port number")?;
        }
        if let Ok(v) = env::var("API_KEY") {
            settings.api_key = Some(v);
        }
        if let Ok(v) = env::var("STORAGE_BACKEND") {
            settings.storage_backend = v;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            settings.database_url = Some(v);
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            settings.log_level = v;
        }
        if let Ok(v) = env::var("DEV_MODE") {
            settings.dev_mode = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("CORS_ORIGINS") {
            settings.cors_origins = v;
        }
        if let Ok(v) = env::var("SCHEDULER_INTERVAL") {
            settings.scheduler_interval_seconds = v
                .parse()
                .context("SCHEDULER_INTERVAL must be a number of seconds")?;
        }
        if let Ok(v) = env::var("NODE_TIMEOUT") {
            settings.node_timeout_seconds =
                v.parse().context("NODE_TIMEOUT must be a number of seconds")?;
        }
        if let Ok(v) = env::var("MAX_CONCURRENT_JOBS") {
            settings.max_concurrent_jobs =
                v.parse().context("MAX_CONCURRENT_JOBS must be an integer")?;
        }

        if settings.storage_backend != "memory" {
            bail!(
                "unsupported STORAGE_BACKEND {:?}: only the in-memory backend is built in",
                settings.storage_backend
            );
        }

        Ok(settings)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs_f64(self.scheduler_interval_seconds)
    }

    pub fn node_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.node_timeout_seconds * 1000.0) as i64)
    }

    /// How long a fresh assignment survives a heartbeat that does not
    /// mention it. Two scheduler intervals gives the worker at least one
    /// full poll cycle to learn about the job.
    pub fn assignment_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.scheduler_interval_seconds * 2.0 * 1000.0) as i64)
    }
}
