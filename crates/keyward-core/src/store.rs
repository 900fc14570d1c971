//! Persistence for encrypted bundles
//!
//! Stores only ever see [`EncryptedBundle`]s. The session token is passed
//! explicitly on every call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::crypto::EncryptedBundle;

/// Longest accepted identity name
const MAX_IDENTITY_LEN: usize = 64;

const BUNDLE_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unauthorized: missing session token")]
    Unauthorized,
    #[error("Identity not found: {0}")]
    NotFound(String),
    #[error("Invalid identity name: {0}")]
    InvalidIdentity(String),
    #[error("Identity already exists: {0}")]
    AlreadyExists(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Caller's session credential, forwarded to the store on every call.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    fn authorize(&self) -> Result<(), StoreError> {
        if self.is_empty() {
            return Err(StoreError::Unauthorized);
        }
        Ok(())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Validated identity name, safe to use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn parse(name: &str) -> Result<Self, StoreError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_IDENTITY_LEN
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidIdentity(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where encrypted bundles live.
pub trait BundleStore: Send + Sync {
    /// Persist `envelope` under `identity`, replacing any previous one.
    fn store(
        &self,
        session: &SessionToken,
        identity: &str,
        envelope: &EncryptedBundle,
    ) -> Result<IdentityId, StoreError>;

    /// Persist `envelope` under an `identity` that is not stored yet.
    ///
    /// # Errors
    /// `AlreadyExists` if `identity` is taken; the stored envelope is left untouched.
    fn insert(
        &self,
        session: &SessionToken,
        identity: &str,
        envelope: &EncryptedBundle,
    ) -> Result<IdentityId, StoreError>;

    fn fetch(&self, session: &SessionToken, identity: &str) -> Result<EncryptedBundle, StoreError>;

    /// Every stored identity, sorted.
    fn identities(&self, session: &SessionToken) -> Result<Vec<IdentityId>, StoreError>;
}

/// In-process store, for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryStore {
    bundles: Mutex<HashMap<IdentityId, EncryptedBundle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityId, EncryptedBundle>> {
        // Entries are replaced whole, so a poisoned map is still consistent
        self.bundles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BundleStore for MemoryStore {
    fn store(
        &self,
        session: &SessionToken,
        identity: &str,
        envelope: &EncryptedBundle,
    ) -> Result<IdentityId, StoreError> {
        session.authorize()?;
        let id = IdentityId::parse(identity)?;
        self.lock().insert(id.clone(), envelope.clone());
        Ok(id)
    }

    fn insert(
        &self,
        session: &SessionToken,
        identity: &str,
        envelope: &EncryptedBundle,
    ) -> Result<IdentityId, StoreError> {
        session.authorize()?;
        let id = IdentityId::parse(identity)?;
        match self.lock().entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(envelope.clone());
                Ok(id)
            }
        }
    }

    fn fetch(&self, session: &SessionToken, identity: &str) -> Result<EncryptedBundle, StoreError> {
        session.authorize()?;
        let id = IdentityId::parse(identity)?;
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn identities(&self, session: &SessionToken) -> Result<Vec<IdentityId>, StoreError> {
        session.authorize()?;
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One pretty-printed JSON envelope per identity under a data directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a crash never leaves a half-written bundle.
pub struct FileStore {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &IdentityId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, BUNDLE_EXTENSION))
    }

    /// Write `envelope` to a fresh, synced temp file next to its final path.
    fn write_temp(&self, id: &IdentityId, envelope: &EncryptedBundle) -> Result<PathBuf, StoreError> {
        let json = envelope
            .to_json()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{}.{}.{}.tmp", id, std::process::id(), n));
        let written = create_private(&tmp).and_then(|mut file| {
            file.write_all(json.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(tmp)
    }
}

impl BundleStore for FileStore {
    fn store(
        &self,
        session: &SessionToken,
        identity: &str,
        envelope: &EncryptedBundle,
    ) -> Result<IdentityId, StoreError> {
        session.authorize()?;
        let id = IdentityId::parse(identity)?;
        let tmp = self.write_temp(&id, envelope)?;
        if let Err(e) = fs::rename(&tmp, self.path_for(&id)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        log::info!("stored bundle for identity '{}'", id);
        Ok(id)
    }

    fn insert(
        &self,
        session: &SessionToken,
        identity: &str,
        envelope: &EncryptedBundle,
    ) -> Result<IdentityId, StoreError> {
        session.authorize()?;
        let id = IdentityId::parse(identity)?;
        let tmp = self.write_temp(&id, envelope)?;

        // link(2) fails if the target exists, so a concurrent create cannot be clobbered
        let linked = fs::hard_link(&tmp, self.path_for(&id));
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {
                log::info!("created bundle for identity '{}'", id);
                Ok(id)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self, session: &SessionToken, identity: &str) -> Result<EncryptedBundle, StoreError> {
        session.authorize()?;
        let id = IdentityId::parse(identity)?;
        let contents = match fs::read_to_string(self.path_for(&id)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        EncryptedBundle::from_json(&contents).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn identities(&self, session: &SessionToken) -> Result<Vec<IdentityId>, StoreError> {
        session.authorize()?;
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BUNDLE_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| IdentityId::parse(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DerivationMetadata, CIPHER_ALGORITHM, KDF_ALGORITHM, MIN_ITERATIONS};
    use tempfile::tempdir;

    /// Structurally valid envelope; stores never decrypt.
    fn envelope(marker: &str) -> EncryptedBundle {
        EncryptedBundle {
            version: "1.0".to_string(),
            encrypted_data: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                marker,
            ),
            salt: "11".repeat(32),
            iv: "22".repeat(16),
            auth_tag: Some("33".repeat(16)),
            derivation_metadata: DerivationMetadata {
                algorithm: KDF_ALGORITHM.to_string(),
                iterations: MIN_ITERATIONS,
                key_size: 256,
                encryption: CIPHER_ALGORITHM.to_string(),
            },
        }
    }

    fn session() -> SessionToken {
        SessionToken::new("session-abc")
    }

    fn exercise(store: &dyn BundleStore) {
        let id = store.store(&session(), "alice", &envelope("one")).unwrap();
        assert_eq!(id.as_str(), "alice");
        assert_eq!(store.fetch(&session(), "alice").unwrap(), envelope("one"));

        // Replace
        store.store(&session(), "alice", &envelope("two")).unwrap();
        assert_eq!(store.fetch(&session(), "alice").unwrap(), envelope("two"));

        store.store(&session(), "bob", &envelope("three")).unwrap();
        let ids: Vec<_> = store
            .identities(&session())
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["alice", "bob"]);

        assert!(matches!(
            store.fetch(&session(), "carol"),
            Err(StoreError::NotFound(ref id)) if id == "carol"
        ));
        assert!(matches!(
            store.fetch(&SessionToken::new(""), "alice"),
            Err(StoreError::Unauthorized)
        ));
        assert!(matches!(
            store.store(&SessionToken::new("  "), "alice", &envelope("x")),
            Err(StoreError::Unauthorized)
        ));
        assert!(matches!(
            store.store(&session(), "../etc/passwd", &envelope("x")),
            Err(StoreError::InvalidIdentity(_))
        ));

        // insert never replaces
        assert!(matches!(
            store.insert(&session(), "alice", &envelope("four")),
            Err(StoreError::AlreadyExists(ref id)) if id == "alice"
        ));
        assert_eq!(store.fetch(&session(), "alice").unwrap(), envelope("two"));
        store.insert(&session(), "carol", &envelope("five")).unwrap();
        assert_eq!(store.fetch(&session(), "carol").unwrap(), envelope("five"));
        assert!(matches!(
            store.insert(&SessionToken::new(""), "dave", &envelope("x")),
            Err(StoreError::Unauthorized)
        ));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("bundles")).unwrap();
        exercise(&store);

        assert!(store.dir().join("alice.json").exists());
        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .store(&session(), "alice", &envelope("persisted"))
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.fetch(&session(), "alice").unwrap(),
            envelope("persisted")
        );
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("mallory.json"), "{ not an envelope").unwrap();
        assert!(matches!(
            store.fetch(&session(), "mallory"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_file_store_insert_races() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || store.insert(&session(), "alice", &envelope(&i.to_string())))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StoreError::AlreadyExists(_))));
        assert_eq!(store.identities(&session()).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.store(&session(), "alice", &envelope("x")).unwrap();
        let mode = fs::metadata(dir.path().join("alice.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_identity_validation() {
        assert!(IdentityId::parse("treasury-01").is_ok());
        assert!(IdentityId::parse("a.b_c").is_ok());
        let long = "x".repeat(65);
        for bad in ["", ".hidden", "a/b", "with space", long.as_str()] {
            assert!(IdentityId::parse(bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_session_token_debug_redacted() {
        assert!(!format!("{:?}", session()).contains("abc"));
    }
}
