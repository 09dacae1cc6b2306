//! Configuration for the trackr server, read from `trackr.toml`.
//!
//! Values are layered: file → environment → CLI flags. Every section is
//! optional and falls back to defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [database]
//! path = ".trackr/trackr.db"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! # Environment
//!
//! `TRACKR_HOST`, `TRACKR_PORT`, `TRACKR_DB_PATH`, `TRACKR_LOG` and
//! `TRACKR_LOG_JSON` override the file. A `.env` file in the working
//! directory is loaded first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::board::server::ServerConfig;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "trackr.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

// ── Sections ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".trackr/trackr.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

// ── TrackrToml ───────────────────────────────────────────────────────

/// The complete trackr.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TrackrToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TrackrToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse trackr.toml")
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize trackr.toml")
    }

    /// Apply `TRACKR_*` overrides. `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("TRACKR_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TRACKR_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid TRACKR_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("TRACKR_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("TRACKR_LOG") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("TRACKR_LOG_JSON") {
            self.logging.json = matches!(json.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Load `.env`, then the file at `path` (if any), then the process
    /// environment.
    pub fn resolve(path: &Path) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.host.trim().is_empty() {
            warnings.push("server.host is empty".to_string());
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0: the server will bind a random port".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            warnings.push("database.path is empty".to_string());
        }
        let level = self.logging.level.trim().to_ascii_lowercase();
        // Directives like "trackr=debug,tower_http=warn" are passed through.
        if !level.contains('=') && !LOG_LEVELS.contains(&level.as_str()) {
            warnings.push(format!(
                "Invalid logging.level '{}': expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }
        if self.server.dev_mode && self.server.host != "127.0.0.1" && self.server.host != "localhost"
        {
            warnings.push(format!(
                "server.dev_mode enables permissive CORS while bound to '{}'",
                self.server.host
            ));
        }

        warnings
    }

    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            db_path: self.database.path.clone(),
            dev_mode: self.server.dev_mode,
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// `logging.level`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(logging: &LoggingSection) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let result = if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
