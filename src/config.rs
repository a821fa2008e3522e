//! Runtime configuration: an optional TOML file overlaid by command-line
//! flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::dispatcher::DEFAULT_DEDUP_RETENTION_DAYS;
use crate::types::DEFAULT_DELIVERY_HEADER;

/// Upper bound keeps the window representable as a timestamp offset.
const MAX_DEDUP_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Receives webhooks and runs them through per-hook component chains.
#[derive(Debug, Default, Parser)]
#[command(name = "hook-dispatcher", version, about)]
pub struct Args {
    /// TOML file with default settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Public listener for deliveries
    #[arg(long, value_name = "ADDR")]
    pub http: Option<SocketAddr>,

    /// Admin listener for hook management
    #[arg(long, value_name = "ADDR")]
    pub admin: Option<SocketAddr>,

    /// Database file
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Base URL of the GitHub REST API
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    #[arg(long, value_name = "SECS")]
    pub api_timeout_secs: Option<u64>,

    /// Header carrying the sender's delivery identifier
    #[arg(long, value_name = "NAME")]
    pub delivery_header: Option<String>,

    /// Days to keep processed delivery ids (at least 1)
    #[arg(long, value_name = "DAYS")]
    pub dedup_retention_days: Option<u32>,

    /// Default log level; RUST_LOG overrides it
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: SocketAddr,
    pub admin: SocketAddr,
    pub db: PathBuf,
    pub api_url: String,
    pub api_timeout_secs: u64,
    pub delivery_header: String,
    pub dedup_retention_days: u32,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: SocketAddr::from(([0, 0, 0, 0], 9000)),
            admin: SocketAddr::from(([127, 0, 0, 1], 9001)),
            db: PathBuf::from("data.db"),
            api_url: "https://api.github.com".to_string(),
            api_timeout_secs: 30,
            delivery_header: DEFAULT_DELIVERY_HEADER.to_string(),
            dedup_retention_days: DEFAULT_DEDUP_RETENTION_DAYS,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Reads `args.config` when given, then applies every flag that was set.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.merge(args))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn merge(mut self, args: &Args) -> Self {
        if let Some(http) = args.http {
            self.http = http;
        }
        if let Some(admin) = args.admin {
            self.admin = admin;
        }
        if let Some(db) = &args.db {
            self.db = db.clone();
        }
        if let Some(url) = &args.api_url {
            self.api_url = url.clone();
        }
        if let Some(secs) = args.api_timeout_secs {
            self.api_timeout_secs = secs;
        }
        if let Some(header) = &args.delivery_header {
            self.delivery_header = header.clone();
        }
        if let Some(days) = args.dedup_retention_days {
            self.dedup_retention_days = days;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        self.log_json |= args.log_json;
        self
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn dedup_retention(&self) -> chrono::Duration {
        let days = self.dedup_retention_days.clamp(1, MAX_DEDUP_RETENTION_DAYS);
        chrono::Duration::days(i64::from(days))
    }
}
