//! Directory entries built from roster rows.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use crate::fetcher::RosterRow;

/// Permission granted to every roster member
pub const DEFAULT_PERMISSION: &str = "dashboard";

/// Role assigned to every roster member
pub const DEFAULT_ROLE: &str = "usuario";

/// Identifier -> entry
pub type Directory = HashMap<String, DirectoryEntry>;

/// One authorized user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub identifier: String,
    /// Hex SHA-256 of the national ID
    pub credential_hash: String,
    pub display_name: String,
    pub permissions: String,
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Hex SHA-256 of a credential. Unsalted, matching what the roster stores.
pub fn hash_credential(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Lowercase, trimmed identifier
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Build the directory from parsed rows.
///
/// Rows with an empty name or ID are skipped. Identifiers are derived from the
/// name alone, so two people with the same name collapse into one entry and
/// the later row wins.
pub fn build_entries(rows: &[RosterRow], name_column: &str, id_column: &str) -> Directory {
    let mut directory = Directory::new();
    let mut skipped = 0usize;

    for row in rows {
        let name = row.get(name_column).unwrap_or("").trim();
        let national_id = row.get(id_column).unwrap_or("").trim();

        if name.is_empty() || national_id.is_empty() {
            skipped += 1;
            continue;
        }

        let identifier = normalize_identifier(name);
        directory.insert(
            identifier.clone(),
            DirectoryEntry {
                identifier,
                credential_hash: hash_credential(national_id),
                display_name: name.to_string(),
                permissions: DEFAULT_PERMISSION.to_string(),
                role: DEFAULT_ROLE.to_string(),
                active: true,
            },
        );
    }

    debug!(
        "Built directory: {} entries from {} rows ({} incomplete)",
        directory.len(),
        rows.len(),
        skipped
    );
    directory
}
