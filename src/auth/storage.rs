//! Session storage: file-based (primary) + OS keyring (secondary)
//!
//! The file is the source of truth; the keyring mirrors it when available and
//! is read only when the file is missing. Every call opens, uses and releases
//! its handles; nothing stays open between calls.

use super::types::{AuthError, Session, UserRecord};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use keyring::Entry;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

const SERVICE_NAME: &str = "First";
/// Well-known key the single session record lives under
pub const SESSION_KEY: &str = "auth_session";
const SESSION_FILE_EXT: &str = "dat";

// Obfuscation only, keeps the token out of casual `cat` output
const OBFUSCATION_KEY: &[u8] = b"FirstClientAuthSessionStore";

/// Persistence of the current login session. Last write wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a session, replacing any previous one
    async fn save(&self, token: &str, user: &UserRecord) -> Result<(), AuthError>;

    /// Load the current session, if any
    async fn load(&self) -> Result<Option<Session>, AuthError>;

    /// Remove the current session
    async fn clear(&self) -> Result<(), AuthError>;
}

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    token: String,
    #[serde(default)]
    user: UserRecord,
    saved_at: DateTime<Utc>,
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Session::new(stored.token, stored.user)
    }
}

/// Session storage using the dual file + keyring strategy
pub struct SecureStorage {
    data_dir: PathBuf,
    use_keyring: bool,
}

impl SecureStorage {
    /// Storage in the app's local data directory, with keyring mirroring
    pub fn new() -> Result<Self, AuthError> {
        let data_dir = crate::utils::app_data_dir().ok_or_else(|| {
            AuthError::StorageError("Could not determine data directory".to_string())
        })?;

        info!("SecureStorage initialized:");
        info!("  Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            use_keyring: true,
        })
    }

    /// File-only storage rooted at `data_dir`
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            use_keyring: false,
        }
    }

    /// Enable or disable keyring mirroring
    pub fn with_keyring(mut self, enabled: bool) -> Self {
        self.use_keyring = enabled;
        self
    }

    fn session_file_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", SESSION_KEY, SESSION_FILE_EXT))
    }

    /// XOR obfuscation; applying it twice restores the input
    fn obfuscate(data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &byte)| byte ^ OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()])
            .collect()
    }

    fn encode(stored: &StoredSession) -> Result<String, AuthError> {
        let json = serde_json::to_string(stored)
            .map_err(|e| AuthError::StorageError(format!("Failed to serialize session: {}", e)))?;
        Ok(BASE64.encode(Self::obfuscate(json.as_bytes())))
    }

    fn decode(encoded: &str) -> Option<StoredSession> {
        let obfuscated = match BASE64.decode(encoded.trim()) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to decode session file (base64): {}", e);
                return None;
            }
        };

        match serde_json::from_slice::<StoredSession>(&Self::obfuscate(&obfuscated)) {
            Ok(stored) => Some(stored),
            Err(e) => {
                error!("Failed to deserialize session file: {}", e);
                None
            }
        }
    }

    fn keyring_entry(&self) -> Option<Entry> {
        if !self.use_keyring {
            return None;
        }
        match Entry::new(SERVICE_NAME, SESSION_KEY) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Keyring not available: {}", e);
                None
            }
        }
    }

    async fn store_to_file(&self, encoded: &str) -> Result<(), AuthError> {
        tokio::fs::create_dir_all(&self.data_dir).await.map_err(|e| {
            AuthError::StorageError(format!("Failed to create data directory: {}", e))
        })?;

        let path = self.session_file_path();
        tokio::fs::write(&path, encoded).await.map_err(|e| {
            error!("Failed to write session file: {}", e);
            AuthError::StorageError(format!("Failed to write session file: {}", e))
        })?;

        debug!("Session stored in {} ({} bytes)", path.display(), encoded.len());
        Ok(())
    }

    async fn load_from_file(&self) -> Result<Option<StoredSession>, AuthError> {
        let path = self.session_file_path();

        let encoded = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Session file does not exist (first run or logged out)");
                return Ok(None);
            }
            Err(e) => {
                return Err(AuthError::StorageError(format!(
                    "Failed to read session file: {}",
                    e
                )));
            }
        };

        match Self::decode(&encoded) {
            Some(stored) => Ok(Some(stored)),
            None => {
                // Corrupted record, drop it so the next save starts clean
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    fn store_to_keyring(&self, encoded: &str) {
        let Some(entry) = self.keyring_entry() else {
            return;
        };
        match entry.set_password(encoded) {
            Ok(()) => debug!("Session mirrored to keyring"),
            Err(e) => warn!("Failed to store in keyring (file storage still works): {}", e),
        }
    }

    fn load_from_keyring(&self) -> Option<StoredSession> {
        let entry = self.keyring_entry()?;
        match entry.get_password() {
            Ok(encoded) => Self::decode(&encoded),
            Err(keyring::Error::NoEntry) => {
                debug!("No session in keyring");
                None
            }
            Err(e) => {
                warn!("Keyring read error: {:?}", e);
                None
            }
        }
    }

    fn clear_from_keyring(&self) {
        if let Some(entry) = self.keyring_entry() {
            match entry.delete_credential() {
                Ok(()) => debug!("Cleared session from keyring"),
                Err(keyring::Error::NoEntry) => debug!("No keyring session to clear"),
                Err(e) => warn!("Failed to clear keyring session: {}", e),
            }
        }
    }
}

#[async_trait]
impl SessionStore for SecureStorage {
    async fn save(&self, token: &str, user: &UserRecord) -> Result<(), AuthError> {
        info!("Storing auth session (token length: {} chars)", token.len());

        let encoded = Self::encode(&StoredSession {
            token: token.to_string(),
            user: user.clone(),
            saved_at: Utc::now(),
        })?;

        self.store_to_file(&encoded).await?;
        self.store_to_keyring(&encoded);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, AuthError> {
        if let Some(stored) = self.load_from_file().await? {
            info!("Session loaded from file (saved at {})", stored.saved_at);
            return Ok(Some(stored.into()));
        }

        if let Some(stored) = self.load_from_keyring() {
            info!("Session loaded from keyring (migrating to file storage)");
            if let Ok(encoded) = Self::encode(&stored) {
                let _ = self.store_to_file(&encoded).await;
            }
            return Ok(Some(stored.into()));
        }

        debug!("No stored session found");
        Ok(None)
    }

    async fn clear(&self) -> Result<(), AuthError> {
        let path = self.session_file_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Cleared session file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AuthError::StorageError(format!(
                    "Failed to delete session file: {}",
                    e
                )));
            }
        }
        self.clear_from_keyring();
        Ok(())
    }
}

/// In-process session storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    session: Mutex<Option<Session>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail with a storage error
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current session without going through the async interface
    pub fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStorage {
    async fn save(&self, token: &str, user: &UserRecord) -> Result<(), AuthError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AuthError::StorageError("storage unavailable".to_string()));
        }
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(Session::new(token, user.clone()));
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.current())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(value: serde_json::Value) -> UserRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_obfuscation_roundtrip() {
        let original = b"Hello, World! This is a test.";
        let obfuscated = SecureStorage::obfuscate(original);
        assert_ne!(original.as_slice(), obfuscated.as_slice());
        let recovered = SecureStorage::obfuscate(&obfuscated);
        assert_eq!(original.as_slice(), recovered.as_slice());
    }

    #[tokio::test]
    async fn test_file_storage_preserves_token_and_user() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::in_dir(dir.path());
        let record = user(json!({"id": 1, "name": "Ada", "roles": ["admin"], "meta": {"x": null}}));

        storage.save("t1", &record).await.unwrap();
        let loaded = storage.load().await.unwrap().unwrap();

        assert_eq!(loaded.token, "t1");
        assert_eq!(loaded.user, record);
    }

    #[tokio::test]
    async fn test_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::in_dir(dir.path());
        storage.save("very-secret-token", &UserRecord::new()).await.unwrap();

        let raw = std::fs::read_to_string(storage.session_file_path()).unwrap();
        assert!(!raw.contains("very-secret-token"));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::in_dir(dir.path());

        storage.save("t1", &user(json!({"id": 1}))).await.unwrap();
        storage.save("t2", &user(json!({"id": 2}))).await.unwrap();

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded, Session::new("t2", user(json!({"id": 2}))));
    }

    #[tokio::test]
    async fn test_load_missing_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::in_dir(dir.path().join("nested"));

        assert!(storage.load().await.unwrap().is_none());
        storage.clear().await.unwrap();

        storage.save("t1", &UserRecord::new()).await.unwrap();
        storage.clear().await.unwrap();
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::in_dir(dir.path());
        std::fs::write(storage.session_file_path(), "not base64 at all!").unwrap();

        assert!(storage.load().await.unwrap().is_none());
        assert!(!storage.session_file_path().exists());
    }

    #[tokio::test]
    async fn test_save_surfaces_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let storage = SecureStorage::in_dir(&blocker);

        let result = storage.save("t1", &UserRecord::new()).await;
        assert!(matches!(result, Err(AuthError::StorageError(_))));
    }

    /// Whether the platform keyring round-trips a value through a fresh entry
    fn keyring_usable() -> bool {
        let Ok(entry) = Entry::new(SERVICE_NAME, SESSION_KEY) else {
            return false;
        };
        if entry.set_password("check").is_err() {
            return false;
        }
        let usable = Entry::new(SERVICE_NAME, SESSION_KEY)
            .and_then(|fresh| fresh.get_password())
            .map(|value| value == "check")
            .unwrap_or(false);
        let _ = entry.delete_credential();
        usable
    }

    #[tokio::test]
    async fn test_keyring_restores_session_when_file_is_lost() {
        if !keyring_usable() {
            eprintln!("platform keyring unavailable, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::in_dir(dir.path()).with_keyring(true);
        storage.save("t1", &user(json!({"id": 1}))).await.unwrap();

        std::fs::remove_file(storage.session_file_path()).unwrap();
        let loaded = storage.load().await.unwrap();

        assert_eq!(loaded, Some(Session::new("t1", user(json!({"id": 1})))));
        // Migrated back into the file
        assert!(storage.session_file_path().exists());

        storage.clear().await.unwrap();
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_counts_and_fails() {
        let storage = MemoryStorage::new();
        storage.save("t1", &UserRecord::new()).await.unwrap();
        assert_eq!(storage.save_count(), 1);

        storage.fail_saves(true);
        assert!(storage.save("t2", &UserRecord::new()).await.is_err());
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.current().unwrap().token, "t1");
    }
}
