//! Key/value storage backends for cached records
//!
//! The cache only needs string-in, string-out storage. `FileStore` persists
//! each key as a JSON file under the XDG cache directory so records survive
//! between runs; `MemoryStore` keeps everything in process and can emulate a
//! storage quota.

use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem read/write failed
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Writing the value would exceed the backend's size limit
    #[error("Storage quota exceeded writing '{key}': {needed} bytes needed, limit is {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    /// The backend cannot be used at all (no cache directory, poisoned lock)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// String key/value storage shared by every cache call site
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value, or `None` if the key has never been written
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value`, replacing any previous value for `key`
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the value for `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Lists every stored key
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Prefix of every record file, so foreign files in the directory are never
/// mistaken for records
const RECORD_PREFIX: &str = "mc-";

/// Marks a stem built from a key digest instead of the escaped key
const DIGEST_SUFFIX: &str = ".sha256";

/// Longest escaped key used directly as a file stem; most filesystems cap
/// names at 255 bytes
const MAX_ESCAPED_LEN: usize = 200;

/// Stores each record as `mc-<escaped key>.json` in a cache directory
///
/// Uses `~/.cache/marketcache/` on Linux, or the equivalent XDG path on other
/// platforms. The directory is created on the first write. Keys whose escaped
/// form is too long for a file name are stored as `mc-<sha256>.sha256.json`
/// with the original key in a `.key` file next to it.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl FileStore {
    /// Creates a FileStore in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "marketcache")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a FileStore rooted at a custom directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to the file holding `key`
    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", record_stem(key)))
    }

    fn key_path(&self, stem: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.key", stem))
    }

    fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }

    /// Replaces `path` in one step so readers never see a partial file
    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut file = NamedTempFile::new_in(&self.cache_dir)?;
        file.write_all(contents.as_bytes())?;
        file.persist(path).map_err(|x| x.error)?;
        Ok(())
    }

    /// Recovers the key a record file stem was built from
    fn stem_key(&self, stem: &str) -> io::Result<Option<String>> {
        let Some(escaped) = stem.strip_prefix(RECORD_PREFIX) else {
            return Ok(None);
        };
        if !escaped.ends_with(DIGEST_SUFFIX) {
            return Ok(unescape_key(escaped));
        }
        match fs::read_to_string(self.key_path(stem)) {
            Ok(key) => Ok(Some(key)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.cache_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let stem = record_stem(key);
        if stem.ends_with(DIGEST_SUFFIX) {
            self.write_atomic(&self.key_path(&stem), key)?;
        }
        self.write_atomic(&self.cache_path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let stem = record_stem(key);
        remove_if_present(&self.cache_path(key))?;
        if stem.ends_with(DIGEST_SUFFIX) {
            remove_if_present(&self.key_path(&stem))?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(key) = self.stem_key(stem)? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// File stem (without extension) for `key`
fn record_stem(key: &str) -> String {
    let escaped = escape_key(key);
    if escaped.len() <= MAX_ESCAPED_LEN {
        format!("{}{}", RECORD_PREFIX, escaped)
    } else {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}{}{}", RECORD_PREFIX, digest, DIGEST_SUFFIX)
    }
}

/// Maps an arbitrary key onto a safe file stem
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is reversible so `keys()` can report the original keys.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Inverse of `escape_key`; `None` for stems `escape_key` cannot produce
fn unescape_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else if is_plain(bytes[i]) {
            out.push(bytes[i]);
            i += 1;
        } else {
            return None;
        }
    }
    String::from_utf8(out).ok()
}

/// In-process store, optionally bounded to a number of bytes
///
/// The bound counts key and value lengths together, roughly how browser
/// storage quotas are enforced.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    limit: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects writes once `limit` bytes are in use
    pub fn with_quota(limit: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            limit: Some(limit),
        }
    }

    /// Bytes currently in use (keys plus values)
    pub fn used_bytes(&self) -> usize {
        self.lock()
            .map(|entries| entries.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock()?;

        if let Some(limit) = self.limit {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
