#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tether_kernel_contracts::{ContractViolation, UnixTimeSecs};

pub const STORE_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("state file io failed at {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("state snapshot encode/decode failed: {0}")]
    Serialization(String),
    #[error("state snapshot digest mismatch at {path}")]
    CorruptSnapshot { path: String },
    #[error("unsupported state snapshot schema version {got}")]
    UnsupportedSchema { got: u32 },
    #[error("invalid stored value for {key}: {reason}")]
    InvalidRecord { key: String, reason: &'static str },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// Ephemeral cache entry. Readable until `expires_at`, absent from then on.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransientEntry {
    pub value: String,
    pub stored_at: UnixTimeSecs,
    pub expires_at: UnixTimeSecs,
}

impl TransientEntry {
    pub fn is_live(&self, now: UnixTimeSecs) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct StoreTables {
    options: BTreeMap<String, String>,
    transients: BTreeMap<String, TransientEntry>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoreSnapshotFile {
    schema_version: u32,
    sha256: String,
    tables: StoreTables,
}

/// Process-wide key-value state: durable options plus an expiring transient cache.
///
/// A file-backed store rewrites its snapshot atomically on every mutation; the
/// in-memory state only changes once the snapshot write has succeeded.
#[derive(Debug, Clone)]
pub struct TetherStore {
    tables: StoreTables,
    backing_path: Option<PathBuf>,
}

impl TetherStore {
    pub fn new_in_memory() -> Self {
        Self {
            tables: StoreTables::default(),
            backing_path: None,
        }
    }

    /// Opens (or lazily creates) a JSON snapshot at `path`.
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let tables = if path.exists() {
            load_snapshot(&path)?
        } else {
            StoreTables::default()
        };
        Ok(Self {
            tables,
            backing_path: Some(path),
        })
    }

    pub fn option_get(&self, key: &str) -> Option<&str> {
        self.tables.options.get(key).map(String::as_str)
    }

    pub fn option_set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.commit(|t| {
            t.options.insert(key.to_string(), value);
        })
    }

    pub fn option_delete(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.tables.options.contains_key(key) {
            return Ok(());
        }
        self.commit(|t| {
            t.options.remove(key);
        })
    }

    /// Applies several option writes as one snapshot commit. `None` deletes the key.
    pub fn option_write_batch(
        &mut self,
        writes: Vec<(&str, Option<String>)>,
    ) -> Result<(), StorageError> {
        self.commit(|t| {
            for (key, value) in writes {
                match value {
                    Some(v) => {
                        t.options.insert(key.to_string(), v);
                    }
                    None => {
                        t.options.remove(key);
                    }
                }
            }
        })
    }

    pub fn transient_get(&self, key: &str, now: UnixTimeSecs) -> Option<&TransientEntry> {
        self.tables
            .transients
            .get(key)
            .filter(|entry| entry.is_live(now))
    }

    pub fn transient_set(
        &mut self,
        key: &str,
        value: String,
        now: UnixTimeSecs,
        ttl_secs: u64,
    ) -> Result<(), StorageError> {
        if ttl_secs == 0 {
            return Err(StorageError::InvalidRecord {
                key: key.to_string(),
                reason: "transient ttl must be > 0",
            });
        }
        let entry = TransientEntry {
            value,
            stored_at: now,
            expires_at: now.plus_secs(ttl_secs),
        };
        self.commit(|t| {
            t.transients.retain(|_, e| e.is_live(now));
            t.transients.insert(key.to_string(), entry);
        })
    }

    fn commit<F>(&mut self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut StoreTables),
    {
        let mut next = self.tables.clone();
        mutate(&mut next);
        if let Some(path) = self.backing_path.as_deref() {
            write_snapshot(path, &next)?;
        }
        self.tables = next;
        Ok(())
    }
}

fn tables_digest_hex(tables: &StoreTables) -> Result<String, StorageError> {
    let encoded =
        serde_json::to_vec(tables).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let digest = Sha256::digest(&encoded);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        detail: err.to_string(),
    }
}

fn load_snapshot(path: &Path) -> Result<StoreTables, StorageError> {
    let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let file: StoreSnapshotFile =
        serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if file.schema_version != STORE_SNAPSHOT_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchema {
            got: file.schema_version,
        });
    }
    if tables_digest_hex(&file.tables)? != file.sha256 {
        return Err(StorageError::CorruptSnapshot {
            path: path.display().to_string(),
        });
    }
    tracing::debug!(
        path = %path.display(),
        options = file.tables.options.len(),
        transients = file.tables.transients.len(),
        "loaded state snapshot"
    );
    Ok(file.tables)
}

fn write_snapshot(path: &Path, tables: &StoreTables) -> Result<(), StorageError> {
    let file = StoreSnapshotFile {
        schema_version: STORE_SNAPSHOT_SCHEMA_VERSION,
        sha256: tables_digest_hex(tables)?,
        tables: tables.clone(),
    };
    let encoded = serde_json::to_string_pretty(&file)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| io_error(&parent, e))?;
    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| io_error(&parent, e))?;
    tmp.write_all(encoded.as_bytes())
        .map_err(|e| io_error(path, e))?;
    tmp.flush().map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}
