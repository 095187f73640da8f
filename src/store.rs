//! Durable session storage
//!
//! The chosen authentication proof must survive process restarts. Records are
//! read and written whole under a fixed key; there are no partial updates.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::IdentityProof;

/// Storage key for the persisted auth method
pub const AUTH_METHOD_KEY: &str = "authMethod";

// =============================================================================
// Storage Boundary
// =============================================================================

/// Key-value persistence scoped to this application
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Storage(format!("Invalid storage key: {:?}", key)))
    }
}

/// Write `contents` to `path`, readable by the owner only.
///
/// The bytes land in a temp file beside the target (created `0600` on unix),
/// are synced, then renamed over `path`. Readers see the old file or the new
/// one, never a partial write.
pub(crate) async fn write_secret_file(path: &Path, contents: impl Into<Vec<u8>>) -> Result<()> {
    let path = path.to_path_buf();
    let contents = contents.into();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Storage(format!("Write task failed: {}", e)))?
}

/// One JSON file per key inside a directory.
///
/// Records hold bearer credentials, so files are owner-only and replaced
/// atomically.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        write_secret_file(&self.path_for(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// Session Store
// =============================================================================

/// Persists the chosen identity proof across restarts.
///
/// Only OAuth-derived proofs are persisted; wallet proofs need a live signer
/// and stay in memory.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Load the persisted proof, if any.
    ///
    /// An unreadable record is treated as empty so a corrupt file never locks
    /// the user out of signing in again.
    pub async fn load(&self) -> Result<Option<IdentityProof>> {
        let Some(raw) = self.backend.get(AUTH_METHOD_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<IdentityProof>(&raw) {
            Ok(proof) => {
                debug!(method = %proof.method_kind(), "Loaded stored auth method");
                Ok(Some(proof))
            }
            Err(e) => {
                warn!("Ignoring unreadable stored auth method: {}", e);
                Ok(None)
            }
        }
    }

    /// Persist a proof, replacing whatever was stored.
    pub async fn save(&self, proof: &IdentityProof) -> Result<()> {
        if !proof.method_kind().is_persistable() {
            return Err(Error::Storage(format!(
                "{} proofs are held in memory only",
                proof.method_kind()
            )));
        }

        let raw = serde_json::to_string(proof)?;
        self.backend.set(AUTH_METHOD_KEY, &raw).await?;
        info!(method = %proof.method_kind(), "Stored auth method");
        Ok(())
    }

    /// Remove the persisted proof (sign-out).
    pub async fn clear(&self) -> Result<()> {
        self.backend.remove(AUTH_METHOD_KEY).await?;
        info!("Cleared stored auth method");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::OAuthProvider;

    fn google_proof() -> IdentityProof {
        IdentityProof::oauth(OAuthProvider::Google, "eyJhbGciOiJSUzI1NiJ9.e30.sig", None)
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        assert!(store.load().await.unwrap().is_none());

        let proof = google_proof();
        store.save(&proof).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(proof));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wallet_proof_not_persisted() {
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone());

        let result = store.save(&IdentityProof::wallet("0xABCD")).await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_empty() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(AUTH_METHOD_KEY, "{not json").await.unwrap();
        let store = SessionStore::new(backend);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let proof = google_proof();

        {
            let store = SessionStore::new(Arc::new(FileStore::new(dir.path())));
            store.save(&proof).await.unwrap();
        }

        let reopened = SessionStore::new(Arc::new(FileStore::new(dir.path())));
        assert_eq!(reopened.load().await.unwrap(), Some(proof));

        reopened.clear().await.unwrap();
        reopened.clear().await.unwrap();
        assert!(reopened.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_records_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        let session = SessionStore::new(Arc::new(store));
        session.save(&google_proof()).await.unwrap();
        // Overwrite keeps the mode
        session.save(&google_proof()).await.unwrap();

        let path = dir.path().join("nested").join("authMethod.json");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // No temp files left behind
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }
}
