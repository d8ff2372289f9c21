//! Configuration management
//!
//! `Config` is built once (usually from the environment) and handed to each
//! store's constructor. `RosterSource` is the small persisted document that
//! remembers where the roster lives.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Hosts whose links may be stored as the dashboard link
pub const DEFAULT_DASHBOARD_DOMAINS: &[&str] =
    &["app.powerbi.com", "powerbi.microsoft.com", "powerbi.com"];

const AUTH_CONFIG_FILE: &str = "auth_config.json";
const AUTH_CACHE_FILE: &str = "auth_cache.json";
const AUTH_KEY_FILE: &str = "encryption.key";
const DASHBOARD_LEGACY_FILE: &str = "powerbi_config.json";
const DASHBOARD_SECURE_FILE: &str = "powerbi_secure.dat";
const DASHBOARD_KEY_FILE: &str = "powerbi_encryption.key";

/// Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding keys, cache and config artifacts
    pub data_dir: PathBuf,

    /// Roster link used when no link has been persisted yet
    pub roster_url: Option<String>,

    /// Fixed timeout for every roster request
    pub http_timeout: Duration,

    /// Roster column holding the full name (matched lower-cased)
    pub name_column: String,

    /// Roster column holding the national ID (matched lower-cased)
    pub id_column: String,

    /// Allow-list for the dashboard link host
    pub dashboard_domains: Vec<String>,
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            roster_url: None,
            http_timeout: Duration::from_secs(30),
            name_column: "nombre".to_string(),
            id_column: "cedula".to_string(),
            dashboard_domains: DEFAULT_DASHBOARD_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("DASHGATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("dashgate")
            });

        let mut config = Self::with_data_dir(data_dir);

        config.roster_url = std::env::var("DASHGATE_ROSTER_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        if let Some(secs) = std::env::var("DASHGATE_HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Ok(col) = std::env::var("DASHGATE_NAME_COLUMN") {
            config.name_column = col.trim().to_lowercase();
        }
        if let Ok(col) = std::env::var("DASHGATE_ID_COLUMN") {
            config.id_column = col.trim().to_lowercase();
        }

        Ok(config)
    }

    pub fn auth_config_path(&self) -> PathBuf {
        self.data_dir.join(AUTH_CONFIG_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(AUTH_CACHE_FILE)
    }

    pub fn auth_key_path(&self) -> PathBuf {
        self.data_dir.join(AUTH_KEY_FILE)
    }

    pub fn dashboard_legacy_path(&self) -> PathBuf {
        self.data_dir.join(DASHBOARD_LEGACY_FILE)
    }

    pub fn dashboard_secure_path(&self) -> PathBuf {
        self.data_dir.join(DASHBOARD_SECURE_FILE)
    }

    pub fn dashboard_key_path(&self) -> PathBuf {
        self.data_dir.join(DASHBOARD_KEY_FILE)
    }
}

/// On-disk form of `auth_config.json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterSourceFile {
    csv_url: Option<String>,
    last_updated: Option<DateTime<Utc>>,
}

/// Persisted location of the remote roster
#[derive(Debug)]
pub struct RosterSource {
    path: PathBuf,
    url: Option<String>,
}

impl RosterSource {
    /// Read the persisted link, falling back to `seed` when nothing is stored.
    /// An unreadable document is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>, seed: Option<String>) -> Self {
        let path = path.into();
        let stored = match read_source_file(&path) {
            Ok(file) => file.and_then(|f| f.csv_url),
            Err(e) => {
                warn!("Ignoring unreadable roster source {}: {}", path.display(), e);
                None
            }
        };

        Self {
            path,
            url: stored.or(seed),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::load(config.auth_config_path(), config.roster_url.clone())
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Replace the link and write it through
    pub fn set_url(&mut self, url: &str) -> Result<()> {
        self.url = Some(url.to_string());

        let file = RosterSourceFile {
            csv_url: self.url.clone(),
            last_updated: Some(Utc::now()),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        debug!("Roster source saved to {}", self.path.display());
        Ok(())
    }
}

fn read_source_file(path: &Path) -> Result<Option<RosterSourceFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}
