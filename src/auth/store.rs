use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{AppError, AppResult};

use super::credential::{Credential, CredentialKey};

pub trait CredentialStore: Send + Sync {
    fn load(&self, key: &CredentialKey) -> AppResult<Option<Credential>>;
    fn save(&self, credential: &Credential) -> AppResult<()>;
    fn clear(&self, key: &CredentialKey) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &CredentialKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, key: &CredentialKey) -> AppResult<Option<Credential>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(path)?;
        let credential = serde_json::from_str(&raw)?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> AppResult<()> {
        let path = self.path_for(&credential.key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_string_pretty(credential)?;
        write_atomic(&path, &payload)
    }

    fn clear(&self, key: &CredentialKey) -> AppResult<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
        }

        Ok(())
    }
}

/// Writes to a sibling temp file and renames it over the target, so readers
/// only ever see the previous record or the complete new one.
fn write_atomic(path: &Path, payload: &str) -> AppResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(&tmp)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&tmp, perms)?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<CredentialKey, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credential: Credential) -> Self {
        let store = Self::default();
        if let Ok(mut records) = store.records.lock() {
            records.insert(credential.key.clone(), credential);
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, key: &CredentialKey) -> AppResult<Option<Credential>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AppError::Auth("credential store lock poisoned".to_string()))?;
        Ok(records.get(key).cloned())
    }

    fn save(&self, credential: &Credential) -> AppResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Auth("credential store lock poisoned".to_string()))?;
        records.insert(credential.key.clone(), credential.clone());
        Ok(())
    }

    fn clear(&self, key: &CredentialKey) -> AppResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Auth("credential store lock poisoned".to_string()))?;
        records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::time::RawInstant;

    fn sample() -> Credential {
        Credential::new(
            CredentialKey::new("someone@example.com", "google"),
            "access",
            Some("refresh".to_string()),
            Some(&RawInstant::Integer(1_700_000_000_000)),
            BTreeSet::from(["email".to_string()]),
        )
        .expect("credential")
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path());
        let credential = sample();

        assert!(store.load(&credential.key).expect("load").is_none());
        store.save(&credential).expect("save");

        let loaded = store.load(&credential.key).expect("load").expect("present");
        assert_eq!(loaded, credential);
        assert_eq!(loaded.expires_at(), Some(1_700_000_000));

        store.clear(&credential.key).expect("clear");
        assert!(store.load(&credential.key).expect("load").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path());
        let credential = sample();
        store.save(&credential).expect("save");

        let path = dir
            .path()
            .join(format!("{}.json", credential.key.file_stem()));
        let mode = fs::metadata(path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
