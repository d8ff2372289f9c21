//! Dashgate
//!
//! Sign-in and secure link storage for a mobile dashboard viewer.
//!
//! # Features
//!
//! - **Roster sign-in**: users listed in a shared CSV sign in with name + national ID
//! - **Link handling**: OneDrive/SharePoint share links resolved to direct downloads
//! - **Permission cache**: parsed roster kept on disk for one hour
//! - **Secure config**: dashboard link sealed with AES-256-GCM, legacy plaintext migrated
//!
//! # Architecture
//!
//! ```text
//! UI ──► AuthManager ──► PermissionCache (auth_cache.json)
//!          │    └──────► RemoteDirectoryFetcher ──► HTTP (roster CSV)
//!          └── Session
//!
//! UI ──► SecureDashboardConfig ──► KeyStore (powerbi_encryption.key)
//!                     └──────────► powerbi_secure.dat
//! ```
//!
//! Everything here is blocking and unsynchronized; callers run it off the UI
//! thread and serialize access to a shared [`AuthManager`].

pub mod auth;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod fetcher;
pub mod keystore;
pub mod secure_config;

pub use auth::{AuthManager, AuthOutcome, RejectReason, Session};
pub use cache::{CacheDocument, PermissionCache, CACHE_TTL_SECS};
pub use config::{Config, RosterSource};
pub use directory::{build_entries, hash_credential, Directory, DirectoryEntry};
pub use error::{CoreError, Result};
pub use fetcher::{DirectorySource, HttpTransport, RemoteDirectoryFetcher, ReqwestTransport, RosterRow};
pub use keystore::{get_or_create_key, EncryptionKey, SealedBlob};
pub use secure_config::{DashboardInfo, DashboardMetadata, EmbedType, SecureDashboardConfig};
