//! Output caching.
//!
//! A rendered `(output, status)` pair can be stored under a key derived from
//! the template identity and the request context, so that a later render
//! with the same identity and context skips evaluation entirely.
//!
//! ## Backends
//!
//! - [`InMemoryCache`] - thread-safe map, lives as long as the engine
//! - [`FileCache`] - one JSON file per entry, shared between processes
//!
//! Caching is opt-in through the `cache_on_get` and `cache_on_post` flags of
//! [`EngineConfig`]. Entries never expire; invalidation is up to the
//! deployment (clearing the cache directory, or calling
//! [`CacheBackend::clear`]).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use http::Method;
use neutral_core::error::NeutralError;
use neutral_core::settings::EngineConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::status::Status;

/// A cached render result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRender {
    pub output: String,
    pub status: Status,
}

/// A backend for storing and retrieving cached renders.
///
/// Implementations must make [`set`](CacheBackend::set) atomic with respect
/// to concurrent readers of the same key: a reader sees either the old entry
/// or the new one, never a partial write.
pub trait CacheBackend: Send + Sync {
    /// Retrieves an entry by key.
    fn get(&self, key: &str) -> Result<Option<CachedRender>, NeutralError>;

    /// Stores an entry, replacing any previous one.
    fn set(&self, key: &str, value: CachedRender) -> Result<(), NeutralError>;

    /// Deletes an entry. Returns `true` if the key existed.
    fn delete(&self, key: &str) -> Result<bool, NeutralError>;

    /// Removes all entries.
    fn clear(&self) -> Result<(), NeutralError>;
}

/// A thread-safe in-memory cache backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CachedRender>>>,
}

impl InMemoryCache {
    /// Creates a new empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for InMemoryCache {
    fn get(&self, key: &str) -> Result<Option<CachedRender>, NeutralError> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store.get(key).cloned())
    }

    fn set(&self, key: &str, value: CachedRender) -> Result<(), NeutralError> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, NeutralError> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        Ok(store.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), NeutralError> {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Suffix of cache entry files.
const CACHE_EXTENSION: &str = "cache";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A filesystem-based cache backend.
///
/// Stores each entry as a JSON file named after its key. Writes go to a
/// temporary file in the same directory that is then renamed over the
/// entry, so readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Creates a file cache that stores entries in the given directory.
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory where entries are stored.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, NeutralError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(NeutralError::InvalidArgument(format!(
                "cache key '{key}' is not a valid file name"
            )));
        }
        Ok(self.dir.join(format!("{key}.{CACHE_EXTENSION}")))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{key}.{}.{n}.tmp", std::process::id()))
    }
}

impl CacheBackend for FileCache {
    fn get(&self, key: &str) -> Result<Option<CachedRender>, NeutralError> {
        let path = self.key_path(key)?;
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: CachedRender) -> Result<(), NeutralError> {
        let path = self.key_path(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let data = serde_json::to_vec(&value)?;
        let temp = self.temp_path(key);
        std::fs::write(&temp, &data)?;
        if let Err(e) = std::fs::rename(&temp, &path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, NeutralError> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), NeutralError> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == CACHE_EXTENSION) {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cache entry");
                }
            }
        }
        Ok(())
    }
}

/// The parts of the calling request that affect caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    /// Whether the request carries identifying cookies.
    pub has_cookies: bool,
}

impl RequestContext {
    /// Creates a context for the given method and cookie presence.
    pub const fn new(method: Method, has_cookies: bool) -> Self {
        Self {
            method,
            has_cookies,
        }
    }

    /// Returns `true` for GET, HEAD and OPTIONS.
    pub fn is_read_style(&self) -> bool {
        [Method::GET, Method::HEAD, Method::OPTIONS].contains(&self.method)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Method::GET, false)
    }
}

/// Decides whether a render under `context` may use the output cache.
pub fn is_cacheable(config: &EngineConfig, context: &RequestContext) -> bool {
    if config.cache_disable {
        return false;
    }
    let method_allowed = if context.is_read_style() {
        config.cache_on_get
    } else {
        config.cache_on_post
    };
    method_allowed && !(context.has_cookies && config.no_cache_on_cookies)
}

/// Derives the cache key for a template identity under a request context.
///
/// The key is the hex SHA-256 of the prefix, the identity, the upper-case
/// method name and the cookie flag, so it is safe to use as a file name.
///
/// # Examples
///
/// ```
/// use neutral_template::cache::{cache_key, RequestContext};
///
/// let ctx = RequestContext::default();
/// let key = cache_key("neutral", "pages/home.ntpl", &ctx);
/// assert_eq!(key.len(), 64);
/// assert_eq!(key, cache_key("neutral", "pages/home.ntpl", &ctx));
/// assert_ne!(key, cache_key("other", "pages/home.ntpl", &ctx));
/// ```
pub fn cache_key(prefix: &str, identity: &str, context: &RequestContext) -> String {
    let method = context.method.as_str().to_ascii_uppercase();
    let mut hasher = Sha256::new();
    for part in [
        prefix,
        identity,
        method.as_str(),
        if context.has_cookies { "cookies" } else { "no-cookies" },
    ] {
        hasher.update(part.len().to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
