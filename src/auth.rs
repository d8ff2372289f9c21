//! Roster Authentication
//!
//! Users sign in with their full name and national ID. The roster is pulled
//! through a [`DirectorySource`], kept in the [`PermissionCache`] for an hour,
//! and checked against SHA-256 credential hashes.
//!
//! # Boundary
//!
//! [`AuthManager::try_authenticate`] reports *why* a sign-in did not succeed.
//! [`AuthManager::authenticate`] collapses that to a `bool`: a wrong password
//! and an unreachable roster look the same to the caller, and the cause is
//! only visible in the logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::PermissionCache;
use crate::config::{Config, RosterSource};
use crate::directory::{build_entries, hash_credential, normalize_identifier, Directory};
use crate::error::{CoreError, Result};
use crate::fetcher::{DirectorySource, RemoteDirectoryFetcher};
use crate::keystore::{get_or_create_key, EncryptionKey};

/// Permission that satisfies every check
const ADMIN_PERMISSION: &str = "admin";

/// Authenticated user context. Lives only in memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub identifier: String,
    pub display_name: String,
    pub role: String,
    pub permissions: String,
    pub login_time: DateTime<Utc>,
}

/// Why a credential check was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownIdentifier,
    WrongSecret,
}

/// Result of a sign-in attempt
#[derive(Debug)]
pub enum AuthOutcome {
    /// Credentials matched; the session is now current
    Authenticated(Session),
    /// Roster loaded but the credentials did not match
    Rejected(RejectReason),
    /// Roster could not be loaded
    Unavailable(CoreError),
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }
}

/// Sign-in, session and permission checks for one user of the app.
///
/// Not synchronized: every mutating call takes `&mut self` and may block on
/// disk and network. The type is `Send` but not `Sync`; callers sharing one
/// manager between threads must serialize access themselves (e.g. behind a
/// `Mutex`).
pub struct AuthManager {
    key: EncryptionKey,
    source: RosterSource,
    fetcher: Box<dyn DirectorySource>,
    cache: PermissionCache,
    name_column: String,
    id_column: String,
    directory: Directory,
    session: Option<Session>,
}

impl AuthManager {
    /// Manager that downloads the roster over HTTP
    pub fn new(config: &Config) -> Result<Self> {
        let fetcher = RemoteDirectoryFetcher::new(config)?;
        Self::with_source(config, Box::new(fetcher))
    }

    /// Manager reading the roster from `fetcher`
    pub fn with_source(config: &Config, fetcher: Box<dyn DirectorySource>) -> Result<Self> {
        let key = get_or_create_key(&config.auth_key_path())?;
        debug!("Auth store using key {}", key.key_id());

        Ok(Self {
            key,
            source: RosterSource::from_config(config),
            fetcher,
            cache: PermissionCache::new(config.cache_path()),
            name_column: config.name_column.clone(),
            id_column: config.id_column.clone(),
            directory: Directory::new(),
            session: None,
        })
    }

    /// Identifier of this store's encryption key
    pub fn key_id(&self) -> String {
        self.key.key_id()
    }

    pub fn roster_url(&self) -> Option<&str> {
        self.source.url()
    }

    /// Persist a new roster link. Takes effect on the next cache miss.
    pub fn set_roster_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(CoreError::Validation("roster URL cannot be empty".to_string()));
        }
        self.source.set_url(url)?;
        info!("Roster URL updated");
        Ok(())
    }

    /// Number of entries currently loaded
    pub fn directory_len(&self) -> usize {
        self.directory.len()
    }

    /// Load the directory from cache, or fetch and cache it on a miss
    fn ensure_directory(&mut self) -> Result<()> {
        if let Some(entries) = self.cache.load() {
            self.directory = entries;
            return Ok(());
        }

        let rows = self.fetcher.fetch(&mut self.source)?;
        let entries = build_entries(&rows, &self.name_column, &self.id_column);

        if let Err(e) = self.cache.store(&entries) {
            warn!("Could not write permission cache: {}", e);
        }

        info!("Directory loaded: {} entries", entries.len());
        self.directory = entries;
        Ok(())
    }

    /// Check credentials and report the detailed outcome
    pub fn try_authenticate(&mut self, identifier: &str, secret: &str) -> AuthOutcome {
        if let Err(e) = self.ensure_directory() {
            return AuthOutcome::Unavailable(e);
        }

        let identifier = normalize_identifier(identifier);
        let Some(entry) = self.directory.get(&identifier) else {
            return AuthOutcome::Rejected(RejectReason::UnknownIdentifier);
        };

        // Plain string comparison; not constant time
        if hash_credential(secret) != entry.credential_hash {
            return AuthOutcome::Rejected(RejectReason::WrongSecret);
        }

        let session = Session {
            identifier: entry.identifier.clone(),
            display_name: entry.display_name.clone(),
            role: entry.role.clone(),
            permissions: entry.permissions.clone(),
            login_time: Utc::now(),
        };
        self.session = Some(session.clone());
        AuthOutcome::Authenticated(session)
    }

    /// Check credentials; any failure, including an unreachable roster, is `false`
    pub fn authenticate(&mut self, identifier: &str, secret: &str) -> bool {
        let id = normalize_identifier(identifier);
        match self.try_authenticate(identifier, secret) {
            AuthOutcome::Authenticated(_) => {
                info!("Authentication succeeded for {}", id);
                true
            }
            AuthOutcome::Rejected(reason) => {
                info!("Authentication rejected for {}: {:?}", id, reason);
                false
            }
            AuthOutcome::Unavailable(e) => {
                warn!("Authentication unavailable for {}: {}", id, e);
                false
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Substring match against the session's permission string.
    ///
    /// `"dashboard"` is satisfied by `"not-dashboard"` too, and any string
    /// containing `"admin"` satisfies every token.
    pub fn has_permission(&self, token: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let granted = session.permissions.to_lowercase();
        granted.contains(&token.to_lowercase()) || granted.contains(ADMIN_PERMISSION)
    }

    pub fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Logged out {}", session.identifier);
        }
    }

    /// Drop the cache and reload from the remote roster.
    /// The cache file is gone afterwards even if the reload fails.
    pub fn refresh_permissions(&mut self) -> bool {
        if let Err(e) = self.cache.invalidate() {
            warn!("Could not invalidate permission cache: {}", e);
            return false;
        }

        match self.ensure_directory() {
            Ok(()) => true,
            Err(e) => {
                warn!("Permission refresh failed: {}", e);
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_session_permissions(&mut self, permissions: &str) {
        self.session = Some(Session {
            identifier: "test".to_string(),
            display_name: "Test".to_string(),
            role: "usuario".to_string(),
            permissions: permissions.to_string(),
            login_time: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::RosterRow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    /// In-memory roster with a fetch counter
    struct StaticSource {
        rows: Option<Vec<RosterRow>>,
        fetches: Arc<AtomicUsize>,
    }

    impl DirectorySource for StaticSource {
        fn fetch(&self, _source: &mut RosterSource) -> Result<Vec<RosterRow>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.rows
                .clone()
                .ok_or_else(|| CoreError::Network("connection refused".to_string()))
        }
    }

    fn roster() -> Vec<RosterRow> {
        vec![
            RosterRow::from_pairs([("nombre", "Juan Pérez"), ("cedula", "12345678")]),
            RosterRow::from_pairs([("nombre", "María García"), ("cedula", "23456789")]),
            RosterRow::from_pairs([("nombre", ""), ("cedula", "99999999")]),
        ]
    }

    fn manager(rows: Option<Vec<RosterRow>>) -> (AuthManager, Arc<AtomicUsize>, TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = StaticSource {
            rows,
            fetches: fetches.clone(),
        };
        let manager = AuthManager::with_source(&config, Box::new(source)).unwrap();
        (manager, fetches, dir)
    }

    #[test]
    fn test_authenticate_creates_session() {
        let (mut auth, _, _dir) = manager(Some(roster()));

        assert!(!auth.is_authenticated());
        assert!(auth.authenticate("  JUAN PÉREZ ", "12345678"));
        assert!(auth.is_authenticated());

        let session = auth.current_session().unwrap();
        assert_eq!(session.identifier, "juan pérez");
        assert_eq!(session.display_name, "Juan Pérez");
        assert_eq!(session.role, "usuario");
        assert_eq!(session.permissions, "dashboard");
    }

    #[test]
    fn test_rejections_are_distinguished_internally() {
        let (mut auth, _, _dir) = manager(Some(roster()));

        assert!(matches!(
            auth.try_authenticate("nobody", "12345678"),
            AuthOutcome::Rejected(RejectReason::UnknownIdentifier)
        ));
        assert!(matches!(
            auth.try_authenticate("juan pérez", "00000000"),
            AuthOutcome::Rejected(RejectReason::WrongSecret)
        ));
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn test_unavailable_roster_is_false_at_boundary() {
        let (mut auth, _, _dir) = manager(None);

        assert!(matches!(
            auth.try_authenticate("juan pérez", "12345678"),
            AuthOutcome::Unavailable(CoreError::Network(_))
        ));
        assert!(!auth.authenticate("juan pérez", "12345678"));
    }

    #[test]
    fn test_cache_serves_second_login() {
        let (mut auth, fetches, _dir) = manager(Some(roster()));

        assert!(auth.authenticate("juan pérez", "12345678"));
        assert!(auth.authenticate("maría garcía", "23456789"));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(auth.directory_len(), 2);
    }

    #[test]
    fn test_logout_clears_session() {
        let (mut auth, _, _dir) = manager(Some(roster()));
        assert!(auth.authenticate("juan pérez", "12345678"));

        auth.logout();
        assert!(!auth.is_authenticated());
        assert!(auth.current_session().is_none());
        assert!(!auth.has_permission("dashboard"));
    }

    #[test]
    fn test_has_permission_substring_semantics() {
        let (mut auth, _, _dir) = manager(Some(roster()));

        auth.set_session_permissions("dashboard");
        assert!(auth.has_permission("dashboard"));
        assert!(auth.has_permission("DASH"));
        assert!(!auth.has_permission("reports"));

        // Substring match, not set membership
        auth.set_session_permissions("not-dashboard");
        assert!(auth.has_permission("dashboard"));

        auth.set_session_permissions("admin,reports");
        assert!(auth.has_permission("users"));
    }

    #[test]
    fn test_refresh_refetches() {
        let (mut auth, fetches, _dir) = manager(Some(roster()));

        assert!(auth.authenticate("juan pérez", "12345678"));
        assert!(auth.refresh_permissions());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_deletes_cache_even_when_fetch_fails() {
        let (mut auth, _, dir) = manager(None);
        let config = Config::with_data_dir(dir.path());
        let cache = PermissionCache::new(config.cache_path());
        cache
            .store(&build_entries(&roster(), "nombre", "cedula"))
            .unwrap();

        assert!(!auth.refresh_permissions());
        assert!(!config.cache_path().exists());
    }

    #[test]
    fn test_set_roster_url() {
        let (mut auth, _, dir) = manager(Some(roster()));

        assert!(auth.roster_url().is_none());
        assert!(matches!(auth.set_roster_url("  "), Err(CoreError::Validation(_))));

        auth.set_roster_url("https://intranet.example/roster.csv").unwrap();
        assert_eq!(auth.roster_url(), Some("https://intranet.example/roster.csv"));
        assert!(Config::with_data_dir(dir.path()).auth_config_path().exists());
    }

    #[test]
    fn test_key_file_provisioned() {
        let (auth, _, dir) = manager(Some(roster()));
        let config = Config::with_data_dir(dir.path());

        assert!(config.auth_key_path().exists());
        assert_eq!(auth.key_id().len(), 16);
    }
}
