use crate::error::StorageError;
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
};

/// Persistent key/value slots, shaped after browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.lock();
            for (key, value) in entries {
                guard.insert(key.to_string(), value.to_string());
            }
        }
        store
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            write_entries(&path, &BTreeMap::new())?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let mut entries = read_entries(&self.path)?;
        f(&mut entries);
        write_entries(&self.path, &entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(read_entries(&self.path)?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Sibling the payload is staged in before it replaces `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes the whole payload to a sibling file and renames it over `path`, so
/// readers only ever see the old or the new object.
fn write_entries(
    path: &Path,
    entries: &BTreeMap<String, String>,
) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(entries)?;
    let staging = staging_path(path);
    let mut file = fs::File::create(&staging)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn in_memory_store__clones_share_the_same_slots() {
        // given
        let store = InMemoryStore::new();
        let other = store.clone();

        // when
        store.set("referralCode", "PROMO123").unwrap();

        // then
        assert_eq!(other.get("referralCode").unwrap().as_deref(), Some("PROMO123"));
    }

    #[test]
    fn in_memory_store__remove_missing_key_is_a_no_op() {
        let store = InMemoryStore::with_entries([("a", "1")]);

        store.remove("b").unwrap();

        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn file_store__persists_across_reopen() {
        // given
        let dir = TempDir::new("file_store_reopen").unwrap();
        let path = dir.path().join("nested").join("storage.json");
        let store = FileStore::open(&path).unwrap();

        // when
        store.set("accessToken", "tok").unwrap();
        store.set("missionFlag", "EXTERNAL_REWARD").unwrap();
        store.remove("missionFlag").unwrap();
        let reopened = FileStore::open(&path).unwrap();

        // then
        assert_eq!(reopened.get("accessToken").unwrap().as_deref(), Some("tok"));
        assert_eq!(reopened.get("missionFlag").unwrap(), None);
    }

    #[test]
    fn file_store__half_written_staging_file_leaves_store_readable() {
        // given
        let dir = TempDir::new("file_store_staging").unwrap();
        let path = dir.path().join("storage.json");
        let store = FileStore::open(&path).unwrap();
        store.set("accessToken", "tok").unwrap();
        fs::write(staging_path(&path), "{\"accessToken\": \"ne").unwrap();

        // when
        let before = store.get("accessToken").unwrap();
        store.set("referralCode", "PROMO123").unwrap();

        // then
        assert_eq!(before.as_deref(), Some("tok"));
        assert_eq!(store.get("accessToken").unwrap().as_deref(), Some("tok"));
        assert_eq!(store.get("referralCode").unwrap().as_deref(), Some("PROMO123"));
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn file_store__rejects_corrupt_payload() {
        // given
        let dir = TempDir::new("file_store_corrupt").unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "not json").unwrap();
        let store = FileStore::open(&path).unwrap();

        // when
        let result = store.get("accessToken");

        // then
        assert!(matches!(result, Err(StorageError::Json(_))));
    }
}
