//! Blob storage boundary: a flat key → bytes namespace with `/`-separated keys.
//!
//! [`LocalStore`] maps keys onto a directory tree, [`MemoryStore`] keeps everything
//! in a map (and records reads/writes for tests), and [`Retrying`] wraps either with
//! bounded exponential backoff, surfacing [`StoreError::Unavailable`] only after
//! the retries are exhausted.

use crate::error::StoreError;
use crate::util::{is_retriable_io_error, remove_with_backoff, write_atomic, RetryPolicy};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait BlobStore: Send + Sync {
    /// All keys starting with `prefix`, sorted lexicographically.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
    fn exists(&self, key: &str) -> StoreResult<bool>;
    /// Streaming read; the caller decides how much to consume.
    fn open(&self, key: &str) -> StoreResult<Box<dyn Read + Send>>;
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()>;
    fn upload(&self, key: &str, local: &Path) -> StoreResult<()>;
    /// Idempotent: deleting a missing key succeeds.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Whole blob, or `None` when it doesn't exist.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut r = match self.open(key) {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).map_err(|e| classify_io(key, e))?;
        Ok(Some(buf))
    }

    /// Up to `n` leading bytes (fewer if the blob is shorter).
    fn read_head(&self, key: &str, n: usize) -> StoreResult<Vec<u8>> {
        let r = self.open(key)?;
        let mut buf = Vec::with_capacity(n);
        r.take(n as u64).read_to_end(&mut buf).map_err(|e| classify_io(key, e))?;
        Ok(buf)
    }
}

pub(crate) fn classify_io(key: &str, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else if is_retriable_io_error(&e) {
        StoreError::Transient { key: key.to_string(), source: e }
    } else {
        StoreError::Io { key: key.to_string(), source: e }
    }
}

/// Last path segment of a key (`"rede social/raw/RC_2025-03.zst"` → `"RC_2025-03.zst"`).
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Join a prefix and a name with exactly one `/` between them (empty prefix allowed).
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

// ----------------------------- local directory ------------------------------------

/// Keys are paths relative to `root`.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').filter(|s| !s.is_empty()).fold(self.root.clone(), |p, seg| p.join(seg))
    }
}

impl BlobStore for LocalStore {
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let ent = entry.map_err(|e| {
                let key = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                let io = e.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk loop"));
                classify_io(&key, io)
            })?;
            if !ent.file_type().is_file() {
                continue;
            }
            let Ok(rel) = ent.path().strip_prefix(&self.root) else { continue };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.ends_with(".tmp") {
                continue; // in-flight atomic write
            }
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        match fs::metadata(self.path_for(key)) {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(classify_io(key, e)),
        }
    }

    fn open(&self, key: &str) -> StoreResult<Box<dyn Read + Send>> {
        let f = File::open(self.path_for(key)).map_err(|e| classify_io(key, e))?;
        Ok(Box::new(f))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        write_atomic(&self.path_for(key), bytes).map_err(|e| anyhow_to_store(key, e))
    }

    fn upload(&self, key: &str, local: &Path) -> StoreResult<()> {
        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| classify_io(key, e))?;
        }
        let mut tmp_name = dest.file_name().map(|s| s.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = dest.with_file_name(tmp_name);
        fs::copy(local, &tmp).map_err(|e| classify_io(key, e))?;
        fs::rename(&tmp, &dest).map_err(|e| classify_io(key, e))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        remove_with_backoff(&self.path_for(key)).map_err(|e| anyhow_to_store(key, e))
    }
}

fn anyhow_to_store(key: &str, e: anyhow::Error) -> StoreError {
    match e.downcast::<io::Error>() {
        Ok(io) => classify_io(key, io),
        Err(other) => StoreError::Io {
            key: key.to_string(),
            source: io::Error::new(io::ErrorKind::Other, format!("{other:#}")),
        },
    }
}

// ----------------------------- in-memory ------------------------------------

/// Map-backed store. Records every `open` and every `put` so tests can assert
/// on access patterns (e.g. "input never read", "checkpoints strictly increase").
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    opened: Mutex<Vec<String>>,
    puts: Mutex<Vec<(String, Vec<u8>)>>,
    transient_failures: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.lock().insert(key.into(), bytes.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }

    /// Keys passed to `open`, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// `(key, bytes)` for every `put`/`upload`, in call order.
    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.puts.lock().clone()
    }

    /// The next `n` operations fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        *self.transient_failures.lock() = n;
    }

    fn maybe_fail(&self, key: &str) -> StoreResult<()> {
        let mut left = self.transient_failures.lock();
        if *left > 0 {
            *left -= 1;
            return Err(StoreError::Transient {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::TimedOut, "injected timeout"),
            });
        }
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.maybe_fail(prefix)?;
        Ok(self.blobs.lock().keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.maybe_fail(key)?;
        Ok(self.blobs.lock().contains_key(key))
    }

    fn open(&self, key: &str) -> StoreResult<Box<dyn Read + Send>> {
        self.maybe_fail(key)?;
        self.opened.lock().push(key.to_string());
        let bytes = self
            .blobs
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        self.maybe_fail(key)?;
        self.puts.lock().push((key.to_string(), bytes.to_vec()));
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn upload(&self, key: &str, local: &Path) -> StoreResult<()> {
        let bytes = fs::read(local).map_err(|e| classify_io(key, e))?;
        self.put(key, &bytes)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.maybe_fail(key)?;
        self.blobs.lock().remove(key);
        Ok(())
    }
}

// ----------------------------- retry wrapper ------------------------------------

/// Retries transient failures of the wrapped store with [`RetryPolicy`].
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: BlobStore> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn call<T>(&self, key: &str, op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
        self.policy.run(op, StoreError::is_transient).map_err(|(e, attempts)| {
            if e.is_transient() {
                tracing::warn!(key, attempts, error = %e, "giving up on blob operation");
                StoreError::Unavailable { key: key.to_string(), attempts, last: e.to_string() }
            } else {
                e
            }
        })
    }
}

impl<S: BlobStore> BlobStore for Retrying<S> {
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.call(prefix, || self.inner.list(prefix))
    }
    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.call(key, || self.inner.exists(key))
    }
    fn open(&self, key: &str) -> StoreResult<Box<dyn Read + Send>> {
        self.call(key, || self.inner.open(key))
    }
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        self.call(key, || self.inner.put(key, bytes))
    }
    fn upload(&self, key: &str, local: &Path) -> StoreResult<()> {
        self.call(key, || self.inner.upload(key, local))
    }
    fn delete(&self, key: &str) -> StoreResult<()> {
        self.call(key, || self.inner.delete(key))
    }
}
