//! Namespaced key-value persistence.
//!
//! The session layer never touches the filesystem directly; it talks to a
//! [`KvStore`], so the same logic runs against an in-memory map in tests and
//! against JSON files on disk in the CLI.
//!
//! The trait is synchronous. [`FileKvStore`] uses blocking `std::fs` calls
//! and the session store invokes them while holding its lock. Values are a
//! few kilobytes of JSON per key and the only caller is a single-user CLI, so
//! the blocking write is accepted in exchange for atomic read-modify-persist
//! under one lock. A backend with real I/O latency should wrap its calls in
//! `tokio::task::spawn_blocking` behind this trait.

use crate::error::{MedgoError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait KvStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
    fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    /// Keys present in a namespace, sorted.
    fn keys(&self, namespace: &str) -> Result<Vec<String>>;
}

// ============================================================================
// MemoryKvStore
// ============================================================================

/// Process-lifetime store. Also serves as the "short-lived" tier of the
/// reusable-session cache.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    inner: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, String>>>> {
        self.inner
            .lock()
            .map_err(|_| MedgoError::Storage("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        if let Some(ns) = self.lock()?.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// FileKvStore
// ============================================================================

/// One UTF-8 JSON file per key:
///
/// ```text
/// base_dir/
/// ├── pointer/
/// │   └── current_session.json
/// └── snapshots/
///     └── 6f1c...json
/// ```
#[derive(Debug, Clone)]
pub struct FileKvStore {
    base_dir: PathBuf,
}

impl FileKvStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.base_dir.join(encode_component(namespace))
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", encode_component(key)))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.key_path(namespace, key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)?;
        let path = self.key_path(namespace, key);
        // Write-then-rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        match fs::remove_file(self.key_path(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json") {
                if let Some(key) = decode_component(stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so any key is a safe
/// file name.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_component(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
