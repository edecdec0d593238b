//! Object-store abstraction for model artifacts.
//!
//! Provides the `ObjectStore` trait and backends the registry promotes
//! into and serves from.
//!
//! # Backends
//!
//! - `LocalFsStore`: directory-backed store for deployments
//! - `InMemoryStore`: in-memory backend for testing
//!
//! # Example
//!
//! ```
//! use sentinela::store::{InMemoryStore, ObjectStore};
//!
//! let store = InMemoryStore::new();
//! store.put("models/champion/cluster_0.json", b"{}".to_vec()).unwrap();
//! assert_eq!(store.list("models/champion/").unwrap().len(), 1);
//! ```

pub mod fs;
pub mod memory;
pub mod registry;

pub use fs::LocalFsStore;
pub use memory::InMemoryStore;
pub use registry::ModelRegistry;

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store backend unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// A flat keyed object store. Keys are slash-separated paths; listing
/// is by key prefix. Implementations must be safe to share across the
/// per-run worker threads.
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Server-side copy. `put(dst, get(src))` semantics.
    fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let bytes = self.get(src)?;
        self.put(dst, bytes)
    }

    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Content digest of one object.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Digest of every object under `prefix`, keyed by full key. Two
/// fingerprints are equal exactly when the prefix holds the same keys
/// with the same contents.
pub fn fingerprint(store: &dyn ObjectStore, prefix: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for key in store.list(prefix)? {
        let bytes = store.get(&key)?;
        out.insert(key, content_digest(&bytes));
    }
    Ok(out)
}

/// Run `op` with bounded exponential backoff on retryable errors.
pub fn with_retry<T>(
    what: &str,
    attempts: u32,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut delay = Duration::from_millis(50);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                attempt += 1;
                warn!(what, attempt, error = %e, "store call failed, retrying");
                thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_secs(2));
            }
            Err(e) => return Err(e),
        }
    }
}
