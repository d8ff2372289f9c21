//! Secure Dashboard Configuration
//!
//! Holds the single dashboard link and its metadata, sealed with the
//! dashboard store's own key. Older installs kept the same data as plaintext
//! JSON; opening the store converts that file once and deletes it.
//!
//! Failures here are returned, not logged away: whoever is configuring the
//! link needs to see them.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::keystore::{get_or_create_key, EncryptionKey, SealedBlob};

const DEFAULT_TITLE: &str = "Tablero Power BI";
const DEFAULT_DESCRIPTION: &str = "Tablero corporativo";

/// Characters of the link shown in summaries
const URL_PREVIEW_CHARS: usize = 50;

const EMBED_PARAMS: &[&str] = &[
    "rs:embed=true",
    "pageName=ReportSection",
    "autoAuth=true",
    "ctid=common",
];

const MOBILE_PARAMS: &[&str] = &[
    "rs:embed=true",
    "autoAuth=true",
    "navContentPaneEnabled=false",
    "filterPaneEnabled=false",
    "toolbarEnabled=false",
];

/// Kind of embedded content a link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedType {
    Report,
    Dashboard,
    Tile,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EmbedType {
    /// Classify by path segment (`/reportEmbed`, `/dashboardEmbed`, `/tileEmbed`)
    pub fn detect(url: &str) -> Self {
        let Ok(parsed) = Url::parse(url) else {
            return EmbedType::Unknown;
        };
        let Some(segments) = parsed.path_segments() else {
            return EmbedType::Unknown;
        };

        for segment in segments {
            match segment.to_lowercase().as_str() {
                "reportembed" => return EmbedType::Report,
                "dashboardembed" => return EmbedType::Dashboard,
                "tileembed" => return EmbedType::Tile,
                _ => {}
            }
        }
        EmbedType::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedType::Report => "report",
            EmbedType::Dashboard => "dashboard",
            EmbedType::Tile => "tile",
            EmbedType::Unknown => "unknown",
        }
    }
}

/// Descriptive data stored with the link
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// ISO-8601; kept as text so legacy values survive migration untouched
    #[serde(default)]
    pub configured_date: Option<String>,
    #[serde(default)]
    pub embed_type: EmbedType,
}

/// Plaintext payload inside the sealed blob
#[derive(Debug, Serialize, Deserialize)]
struct StoredDashboard {
    url: Option<String>,
    #[serde(default)]
    metadata: DashboardMetadata,
    last_updated: DateTime<Utc>,
}

/// Pre-encryption file layout
#[derive(Debug, Deserialize)]
struct LegacyDashboardFile {
    dashboard_url: Option<String>,
    #[serde(default)]
    config: DashboardMetadata,
}

/// Summary for display; the link itself is truncated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardInfo {
    pub url_preview: String,
    pub title: String,
    pub description: String,
    pub embed_type: EmbedType,
    pub configured_date: Option<String>,
    pub is_configured: bool,
}

/// Encrypted store for the dashboard link
pub struct SecureDashboardConfig {
    key: EncryptionKey,
    secure_path: PathBuf,
    legacy_path: PathBuf,
    allowed_domains: Vec<String>,
    url: Option<String>,
    metadata: DashboardMetadata,
}

impl SecureDashboardConfig {
    /// Open the store, migrating a legacy plaintext file if that is all there is
    pub fn open(config: &Config) -> Result<Self> {
        let key = get_or_create_key(&config.dashboard_key_path())?;

        let mut store = Self {
            key,
            secure_path: config.dashboard_secure_path(),
            legacy_path: config.dashboard_legacy_path(),
            allowed_domains: config
                .dashboard_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            url: None,
            metadata: DashboardMetadata::default(),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<()> {
        if self.secure_path.exists() {
            let stored = self.read_encrypted()?;
            self.url = stored.url;
            self.metadata = stored.metadata;
            debug!("Dashboard config loaded (key {})", self.key.key_id());
        } else if self.legacy_path.exists() {
            let legacy = read_legacy(&self.legacy_path)?;
            self.url = legacy.dashboard_url;
            self.metadata = legacy.config;
            self.save(self.url.clone(), self.metadata.clone())?;
            info!("Migrated plaintext dashboard config to encrypted storage");
        }
        Ok(())
    }

    fn read_encrypted(&self) -> Result<StoredDashboard> {
        let raw = std::fs::read(&self.secure_path)?;
        let blob: SealedBlob = serde_json::from_slice(&raw).map_err(|e| {
            CoreError::Storage(format!("{}: {}", self.secure_path.display(), e))
        })?;
        let plain = self.key.open(&blob)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    /// Seal and write `url`/`metadata`, then adopt them and drop any plaintext copy
    fn save(&mut self, url: Option<String>, metadata: DashboardMetadata) -> Result<()> {
        let stored = StoredDashboard {
            url,
            metadata,
            last_updated: Utc::now(),
        };
        let blob = self.key.seal(&serde_json::to_vec(&stored)?)?;
        let data = serde_json::to_vec_pretty(&blob)?;

        if let Some(parent) = self.secure_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = self.secure_path.with_extension("tmp");
        std::fs::write(&temp_path, &data)?;
        std::fs::rename(&temp_path, &self.secure_path)?;

        remove_if_exists(&self.legacy_path)?;

        self.url = stored.url;
        self.metadata = stored.metadata;
        Ok(())
    }

    /// Validate and store a new dashboard link
    pub fn set(&mut self, url: &str, title: &str, description: &str) -> Result<()> {
        let url = url.trim();
        self.validate_url(url)?;

        let metadata = DashboardMetadata {
            title: non_empty_or(title, DEFAULT_TITLE),
            description: non_empty_or(description, DEFAULT_DESCRIPTION),
            configured_date: Some(Utc::now().to_rfc3339()),
            embed_type: EmbedType::detect(url),
        };

        self.save(Some(url.to_string()), metadata)?;
        info!("Dashboard link set ({})", self.metadata.embed_type.as_str());
        Ok(())
    }

    fn validate_url(&self, url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(CoreError::Validation("dashboard URL cannot be empty".to_string()));
        }

        let parsed = Url::parse(url)
            .map_err(|e| CoreError::Validation(format!("invalid dashboard URL: {}", e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoreError::Validation(
                "dashboard URL must start with http:// or https://".to_string(),
            ));
        }

        let host = parsed.host_str().unwrap_or("").to_lowercase();
        let allowed = self
            .allowed_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
        if !allowed {
            return Err(CoreError::Validation(format!(
                "{} is not a recognized dashboard host",
                host
            )));
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn get_dashboard_url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| CoreError::Configuration("dashboard URL not configured".to_string()))
    }

    pub fn metadata(&self) -> &DashboardMetadata {
        &self.metadata
    }

    /// Link with iframe embedding parameters
    pub fn get_embed_url(&self) -> Option<String> {
        self.get_dashboard_url()
            .ok()
            .map(|url| append_params(url, EMBED_PARAMS))
    }

    /// Link with navigation, filter and toolbar panes hidden
    pub fn get_mobile_friendly_url(&self) -> Option<String> {
        self.get_dashboard_url()
            .ok()
            .map(|url| append_params(url, MOBILE_PARAMS))
    }

    pub fn dashboard_info(&self) -> Option<DashboardInfo> {
        let url = self.get_dashboard_url().ok()?;

        let url_preview = if url.chars().count() > URL_PREVIEW_CHARS {
            format!("{}...", url.chars().take(URL_PREVIEW_CHARS).collect::<String>())
        } else {
            url.to_string()
        };

        Some(DashboardInfo {
            url_preview,
            title: non_empty_or(&self.metadata.title, DEFAULT_TITLE),
            description: self.metadata.description.clone(),
            embed_type: self.metadata.embed_type,
            configured_date: self.metadata.configured_date.clone(),
            is_configured: true,
        })
    }

    /// Forget the link and delete both on-disk forms
    pub fn clear(&mut self) -> Result<()> {
        remove_artifacts(&self.secure_path, &self.legacy_path)?;
        self.url = None;
        self.metadata = DashboardMetadata::default();
        info!("Dashboard configuration cleared");
        Ok(())
    }

    /// Delete both on-disk forms without opening them.
    ///
    /// The way out when the sealed file no longer opens (key file lost or
    /// replaced): `open` keeps failing until the artifacts are gone.
    pub fn reset(config: &Config) -> Result<()> {
        remove_artifacts(&config.dashboard_secure_path(), &config.dashboard_legacy_path())?;
        info!("Dashboard configuration reset");
        Ok(())
    }
}

fn remove_artifacts(secure_path: &Path, legacy_path: &Path) -> Result<()> {
    remove_if_exists(legacy_path)?;
    remove_if_exists(secure_path)
}

fn read_legacy(path: &Path) -> Result<LegacyDashboardFile> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map_err(|e| CoreError::Storage(format!("{}: {}", path.display(), e)))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn append_params(url: &str, params: &[&str]) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, params.join("&"))
}
