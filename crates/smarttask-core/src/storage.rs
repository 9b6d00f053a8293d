use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Slot holding the serialized task list.
pub const TASKS_KEY: &str = "smarttasks_v1";
/// Slot holding the theme preference.
pub const THEME_KEY: &str = "theme_preference";

/// A slot whose bytes are not UTF-8. `lossy` holds the readable remainder with
/// replacement characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableSlot {
    pub key: String,
    pub lossy: String,
}

impl fmt::Display for UndecodableSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} does not contain valid UTF-8", self.key)
    }
}

impl std::error::Error for UndecodableSlot {}

/// Host key-value storage. Each key names an independent slot holding a string.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// Directory-backed storage: slot `K` lives in `<data_dir>/K.data`.
#[derive(Debug)]
pub struct FileKv {
    pub data_dir: PathBuf,
}

impl FileKv {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened storage");
        Ok(Self { data_dir })
    }

    pub fn slot_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        validate_key(key)?;
        Ok(self.data_dir.join(format!("{key}.data")))
    }
}

impl KvStore for FileKv {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.slot_path(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", path.display()));
            }
        };

        debug!(file = %path.display(), bytes = bytes.len(), "read slot");
        match String::from_utf8(bytes) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) => Err(UndecodableSlot {
                key: key.to_string(),
                lossy: String::from_utf8_lossy(err.as_bytes()).into_owned(),
            }
            .into()),
        }
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.slot_path(key)?;
        write_atomic(&path, value).with_context(|| format!("failed to save slot {key}"))
    }

    #[tracing::instrument(skip(self))]
    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let path = self.slot_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }
}

/// Process-local storage, used for embedding and tests. `fail_writes` makes
/// every `set`/`remove` fail the way a full or disabled host storage would;
/// `fail_reads` does the same for `get`.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    slots: BTreeMap<String, String>,
    pub fail_writes: bool,
    pub fail_reads: bool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        validate_key(key)?;
        if self.fail_reads {
            return Err(anyhow!("storage unavailable reading {key}"));
        }
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        validate_key(key)?;
        if self.fail_writes {
            return Err(anyhow!("storage quota exceeded writing {key}"));
        }
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        validate_key(key)?;
        if self.fail_writes {
            return Err(anyhow!("storage unavailable removing {key}"));
        }
        self.slots.remove(key);
        Ok(())
    }
}

fn validate_key(key: &str) -> anyhow::Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid storage key: {key:?}"))
    }
}

#[tracing::instrument(skip(path, contents))]
fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = contents.len(), "writing slot atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn file_slots_round_trip_and_remove() {
        let temp = tempdir().unwrap();
        let mut kv = FileKv::open(&temp.path().join("nested")).unwrap();

        assert_eq!(kv.get(THEME_KEY).unwrap(), None);
        kv.set(THEME_KEY, "dark").unwrap();
        assert_eq!(kv.get(THEME_KEY).unwrap().as_deref(), Some("dark"));
        assert!(temp.path().join("nested/theme_preference.data").exists());

        kv.remove(THEME_KEY).unwrap();
        kv.remove(THEME_KEY).unwrap();
        assert_eq!(kv.get(THEME_KEY).unwrap(), None);
    }

    #[test]
    fn rejects_path_like_keys() {
        let kv = MemoryKv::new();
        assert!(kv.get("../escape").is_err());
        assert!(kv.get(".hidden").is_err());
        assert!(kv.get("").is_err());
        assert!(kv.get("smarttasks_v1.corrupt").is_ok());
    }

    #[test]
    fn non_utf8_file_slot_is_reported_as_undecodable() {
        let temp = tempdir().unwrap();
        let kv = FileKv::open(temp.path()).unwrap();
        fs::write(temp.path().join("smarttasks_v1.data"), b"[\"caf\xE9\"]").unwrap();

        let err = kv.get(TASKS_KEY).unwrap_err();
        let undecodable = err.downcast_ref::<UndecodableSlot>().unwrap();
        assert_eq!(undecodable.key, TASKS_KEY);
        assert_eq!(undecodable.lossy, "[\"caf\u{FFFD}\"]");
    }

    #[test]
    fn failing_memory_store_refuses_reads() {
        let mut kv = MemoryKv::new();
        kv.set(THEME_KEY, "dark").unwrap();
        kv.fail_reads = true;
        assert!(kv.get(THEME_KEY).is_err());
    }

    #[test]
    fn failing_memory_store_refuses_writes() {
        let mut kv = MemoryKv::failing();
        assert!(kv.set(TASKS_KEY, "[]").is_err());
        assert_eq!(kv.get(TASKS_KEY).unwrap(), None);
    }
}
