//! Permission Cache
//!
//! Persists the parsed directory with a single creation timestamp. The whole
//! document is valid for one hour and then treated as absent; reads never
//! extend that window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::error::Result;

/// Cache validity window (1 hour)
pub const CACHE_TTL_SECS: i64 = 3600;

/// On-disk cache document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDocument {
    pub entries: Directory,
    pub timestamp: DateTime<Utc>,
}

impl CacheDocument {
    /// Fresh strictly before `timestamp + TTL`
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp < Duration::seconds(CACHE_TTL_SECS)
    }
}

/// File-backed directory cache
#[derive(Debug, Clone)]
pub struct PermissionCache {
    path: PathBuf,
}

impl PermissionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached directory if present and fresh
    pub fn load(&self) -> Option<Directory> {
        self.load_at(Utc::now())
    }

    /// Same as [`load`](Self::load) against an explicit clock.
    /// An unreadable document counts as a miss.
    pub fn load_at(&self, now: DateTime<Utc>) -> Option<Directory> {
        let document = match self.read_document() {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!("Permission cache MISS: no document");
                return None;
            }
            Err(e) => {
                warn!("Permission cache unreadable, ignoring: {}", e);
                return None;
            }
        };

        if document.is_fresh_at(now) {
            debug!(
                "Permission cache HIT: {} entries from {}",
                document.entries.len(),
                document.timestamp
            );
            Some(document.entries)
        } else {
            debug!("Permission cache MISS: expired at {}", document.timestamp);
            None
        }
    }

    /// Replace the cached directory, stamped now
    pub fn store(&self, entries: &Directory) -> Result<()> {
        self.store_at(entries, Utc::now())
    }

    /// Replace the cached directory with an explicit timestamp
    pub fn store_at(&self, entries: &Directory, timestamp: DateTime<Utc>) -> Result<()> {
        let document = CacheDocument {
            entries: entries.clone(),
            timestamp,
        };
        let data = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write atomically via temp file
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, &data)?;
        std::fs::rename(&temp_path, &self.path)?;

        debug!("Permission cache SET: {} entries", entries.len());
        Ok(())
    }

    /// Delete the document so the next load misses
    pub fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Permission cache invalidated");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_document(&self) -> Result<Option<CacheDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{build_entries, DirectoryEntry};
    use crate::fetcher::RosterRow;
    use tempfile::tempdir;

    fn sample_directory() -> Directory {
        let rows = vec![
            RosterRow::from_pairs([("nombre", "Juan Pérez"), ("cedula", "12345678")]),
            RosterRow::from_pairs([("nombre", "María García"), ("cedula", "23456789")]),
        ];
        build_entries(&rows, "nombre", "cedula")
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempdir().unwrap();
        let cache = PermissionCache::new(dir.path().join("auth_cache.json"));

        assert!(cache.load().is_none());

        let entries = sample_directory();
        cache.store(&entries).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded, entries);
        assert!(!cache.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_ttl_boundary() {
        let dir = tempdir().unwrap();
        let cache = PermissionCache::new(dir.path().join("auth_cache.json"));
        let written = Utc::now();
        cache.store_at(&sample_directory(), written).unwrap();

        assert!(cache.load_at(written + Duration::minutes(59)).is_some());
        assert!(cache.load_at(written + Duration::minutes(60) - Duration::seconds(1)).is_some());
        assert!(cache.load_at(written + Duration::minutes(60)).is_none());
        assert!(cache.load_at(written + Duration::minutes(61)).is_none());
    }

    #[test]
    fn test_hit_does_not_slide_expiry() {
        let dir = tempdir().unwrap();
        let cache = PermissionCache::new(dir.path().join("auth_cache.json"));
        let written = Utc::now() - Duration::minutes(30);
        cache.store_at(&sample_directory(), written).unwrap();

        assert!(cache.load().is_some());
        assert!(cache.load_at(written + Duration::minutes(61)).is_none());
    }

    #[test]
    fn test_invalidate_forces_miss() {
        let dir = tempdir().unwrap();
        let cache = PermissionCache::new(dir.path().join("auth_cache.json"));
        cache.store(&sample_directory()).unwrap();

        cache.invalidate().unwrap();
        assert!(!cache.path().exists());
        assert!(cache.load().is_none());

        // Second invalidation is a no-op
        cache.invalidate().unwrap();
    }

    #[test]
    fn test_corrupt_document_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = PermissionCache::new(dir.path().join("auth_cache.json"));
        std::fs::write(cache.path(), "{\"entries\": 42}").unwrap();

        assert!(cache.load().is_none());
    }

    #[test]
    fn test_document_shape() {
        let dir = tempdir().unwrap();
        let cache = PermissionCache::new(dir.path().join("auth_cache.json"));
        cache.store(&sample_directory()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert!(raw["timestamp"].is_string());
        let entry: DirectoryEntry =
            serde_json::from_value(raw["entries"]["juan pérez"].clone()).unwrap();
        assert_eq!(entry.permissions, "dashboard");
    }
}
