//! Durable session storage
//!
//! The session survives restarts as two entries, `token` and `user` (the
//! serialized [`Principal`]). They are always written together and cleared
//! together.
//!
//! Backends:
//! - [`KeyringStore`]: system keyring (macOS Keychain, Linux Secret Service)
//! - [`FileStore`]: JSON file in the config directory, for headless machines
//! - [`MemoryStore`]: process-local, for tests and throwaway sessions

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keyring::Entry;

use crate::core::session::Principal;
use crate::error::{Result, VoxtaskError};

const SERVICE_NAME: &str = "voxtask";
const TOKEN_KEY: &str = "token";
const USER_KEY: &str = "user";

/// Credential and principal as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    /// Raw bearer string
    pub token: String,
    /// Identity the token belongs to
    pub user: Principal,
}

/// Durable key-value storage for the session
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    /// Read the persisted session; `None` unless both entries exist
    fn load(&self) -> Result<Option<StoredSession>>;

    /// Persist token and user together
    fn save(&self, token: &str, user: &Principal) -> Result<()>;

    /// Remove both entries; succeeds when already empty
    fn clear(&self) -> Result<()>;
}

fn encode_user(user: &Principal) -> Result<String> {
    serde_json::to_string(user)
        .map_err(|e| VoxtaskError::Storage(format!("Failed to serialize user: {}", e)))
}

fn decode_entries(token: Option<String>, user: Option<String>) -> Result<Option<StoredSession>> {
    match (token, user) {
        (Some(token), Some(user)) if !token.is_empty() => {
            let user = serde_json::from_str(&user)
                .map_err(|e| VoxtaskError::Storage(format!("Stored user is corrupt: {}", e)))?;
            Ok(Some(StoredSession { token, user }))
        }
        _ => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyring
// ─────────────────────────────────────────────────────────────────────────────

/// Session storage in the system keyring
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Store under the default `voxtask` service name
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Store under a custom service name
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VoxtaskError::Storage(format!(
                "Cannot access system keychain. Make sure your keyring is unlocked. ({})",
                e
            ))),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VoxtaskError::Storage(e.to_string())),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for KeyringStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        decode_entries(self.read(TOKEN_KEY)?, self.read(USER_KEY)?)
    }

    fn save(&self, token: &str, user: &Principal) -> Result<()> {
        let user = encode_user(user)?;
        Entry::new(&self.service, TOKEN_KEY)?.set_password(token)?;
        Entry::new(&self.service, USER_KEY)?.set_password(&user)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        // Attempt both even if the first fails
        let token = self.remove(TOKEN_KEY);
        let user = self.remove(USER_KEY);
        token.and(user)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File
// ─────────────────────────────────────────────────────────────────────────────

/// Session storage in a JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store as `session.json` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("session.json"))
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| VoxtaskError::Storage(format!("Session file is corrupt: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        let mut entries = self.read_entries()?;
        decode_entries(entries.remove(TOKEN_KEY), entries.remove(USER_KEY))
    }

    fn save(&self, token: &str, user: &Principal) -> Result<()> {
        let mut entries = BTreeMap::new();
        entries.insert(TOKEN_KEY.to_string(), token.to_string());
        entries.insert(USER_KEY.to_string(), encode_user(user)?);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local session storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry, as it would be persisted
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        let entries = self.lock();
        decode_entries(entries.get(TOKEN_KEY).cloned(), entries.get(USER_KEY).cloned())
    }

    fn save(&self, token: &str, user: &Principal) -> Result<()> {
        let user = encode_user(user)?;
        let mut entries = self.lock();
        entries.insert(TOKEN_KEY.to_string(), token.to_string());
        entries.insert(USER_KEY.to_string(), user);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self.lock();
        entries.remove(TOKEN_KEY);
        entries.remove(USER_KEY);
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<StoredSession>> {
        (**self).load()
    }

    fn save(&self, token: &str, user: &Principal) -> Result<()> {
        (**self).save(token, user)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Principal {
        Principal {
            id: "u1".into(),
            username: Some("ana".into()),
            email: Some("ana@example.com".into()),
        }
    }

    #[test]
    fn test_memory_store_layout() {
        let store = MemoryStore::new();
        store.save("t1", &user()).unwrap();

        assert_eq!(store.get("token").as_deref(), Some("t1"));
        let raw_user: Principal = serde_json::from_str(&store.get("user").unwrap()).unwrap();
        assert_eq!(raw_user, user());
        assert_eq!(
            store.load().unwrap(),
            Some(StoredSession {
                token: "t1".into(),
                user: user()
            })
        );

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_half_written_session_is_absent() {
        assert_eq!(decode_entries(Some("t1".into()), None).unwrap(), None);
        assert_eq!(decode_entries(None, Some("{}".into())).unwrap(), None);
        assert!(decode_entries(Some("t1".into()), Some("not json".into())).is_err());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(&dir.path().join("nested"));

        assert_eq!(store.load().unwrap(), None);
        store.save("t1", &user()).unwrap();
        assert_eq!(store.load().unwrap().unwrap().token, "t1");

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        fs::write(store.path(), "{{{").unwrap();
        assert!(matches!(store.load(), Err(VoxtaskError::Storage(_))));
    }
}
