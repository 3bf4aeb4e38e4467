//! Token persistence.
//!
//! [`TokenStore`] is the seam between the token manager and durable
//! storage. The crate ships a JSON file backend and an in-memory backend;
//! any other persistence collaborator (keychain, database) can implement
//! the trait. Cross-process locking is explicitly the storage
//! collaborator's concern, not this crate's.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};
use crate::types::TokenRecord;

/// Durable storage contract for one credential's token material.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the stored record, `Ok(None)` when none exists.
    ///
    /// # Errors
    ///
    /// `Storage` for I/O failures, `InvalidRecord` when stored material
    /// fails schema validation.
    async fn load(&self) -> Result<Option<TokenRecord>>;

    /// Persist a record, overwriting any previous one.
    ///
    /// # Errors
    ///
    /// `Storage` when persistence fails; callers must treat this as "the
    /// refreshed token was not saved".
    async fn save(&self, record: &TokenRecord) -> Result<()>;
}

/// File-backed token store.
///
/// Persists the fixed JSON schema
/// `{access_token, refresh_token, expires_at, scope?}`. On unix the file
/// is written with owner-only permissions (mode 600).
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<TokenRecord>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no token file");
                return Ok(None);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read token file");
                return Err(AuthError::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let record: TokenRecord = serde_json::from_str(&data).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "token file failed schema validation");
            AuthError::InvalidRecord(format!("{}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), "loaded token record");
        Ok(Some(record))
    }

    async fn save(&self, record: &TokenRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AuthError::Storage(format!(
                    "failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let data = serde_json::to_string_pretty(record)
            .map_err(|e| AuthError::Storage(format!("failed to serialize token record: {}", e)))?;

        tokio::fs::write(&self.path, data).await.map_err(|e| {
            AuthError::Storage(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        // Token files are secrets: owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| {
                    AuthError::Storage(format!(
                        "failed to set permissions on {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
        }

        debug!(path = %self.path.display(), "saved token record");
        Ok(())
    }
}

/// In-memory token store for tests and embedding.
///
/// Clones share the same underlying slot, so a store handed to a manager
/// can be inspected from the outside.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<TokenRecord>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(record))),
        }
    }

    /// Snapshot of the stored record.
    pub async fn current(&self) -> Option<TokenRecord> {
        self.slot.lock().await.clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenRecord>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, record: &TokenRecord) -> Result<()> {
        *self.slot.lock().await = Some(record.clone());
        Ok(())
    }
}
