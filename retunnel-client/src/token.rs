//! Persisted authentication token store.
//!
//! A single JSON document at `~/.retunnel.conf`, holding the auth token
//! plus the server/API URLs it was issued against. Writes are atomic
//! (write to a sibling temp file, then rename) and the file is left
//! readable only by its owner. Corrupt contents reset to defaults rather
//! than propagating a parse error — this store is a cache, not a source
//! of truth the agent can't recover from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_url: Option<String>,
}

/// Owned by the `Supervisor`, never a process-wide singleton — the CLI
/// front end is free to open its own `TokenStore` over the same path for
/// its `authtoken` command.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::at_path(default_path())
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Reads the stored token. Absence (missing file, missing key, or
    /// empty string) is `None`; an empty string is never returned as
    /// `Some("")`.
    pub fn get(&self) -> Option<String> {
        let doc = self.load();
        doc.auth_token.filter(|t| !t.is_empty())
    }

    /// Persists `token`, preserving whatever server/API URL was already
    /// on disk.
    pub fn set(&self, token: &str) -> Result<()> {
        let mut doc = self.load();
        doc.auth_token = Some(token.to_owned());
        self.write(&doc)
    }

    /// Clears the persisted token without touching server/API URL.
    pub fn clear(&self) -> Result<()> {
        let mut doc = self.load();
        doc.auth_token = None;
        self.write(&doc)
    }

    fn load(&self) -> PersistedDocument {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|_| {
                warn!(path = %self.path.display(), "token store contents are corrupt, resetting to defaults");
                PersistedDocument::default()
            }),
            Err(_) => PersistedDocument::default(),
        }
    }

    fn write(&self, doc: &PersistedDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(doc)
            .map_err(|e| crate::error::RetunnelError::Configuration(e.to_string()))?;

        let tmp_path = tmp_sibling(&self.path);
        std::fs::write(&tmp_path, serialized)?;
        set_owner_only(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".retunnel.conf")
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (TokenStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::at_path(dir.path().join(".retunnel.conf"));
        (store, dir)
    }

    #[test]
    fn absence_is_none_not_empty_string() {
        let (store, _dir) = temp_store();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let (store, _dir) = temp_store();
        store.set("tok_abc123").unwrap();
        assert_eq!(store.get(), Some("tok_abc123".to_owned()));
    }

    #[test]
    fn clear_resets_to_absent() {
        let (store, _dir) = temp_store();
        store.set("tok_abc123").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn corrupt_contents_reset_to_defaults() {
        let (store, dir) = temp_store();
        std::fs::write(dir.path().join(".retunnel.conf"), b"not json").unwrap();
        assert_eq!(store.get(), None);
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (store, dir) = temp_store();
        store.set("tok_abc123").unwrap();
        let mode = std::fs::metadata(dir.path().join(".retunnel.conf"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
