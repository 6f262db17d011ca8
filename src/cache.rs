//! Process-local cache for query responses.
//!
//! Each cached response lives in its own JSON file under the cache
//! directory, named by a SHA-256 fingerprint of the service URL plus the
//! query text. Entries honor an optional time-to-live on read and are
//! removed wholesale by [`ResponseCache::clear`]; there is no partial
//! invalidation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::table::Table;

/// File extension for cached response entries.
const ENTRY_EXTENSION: &str = "json";

/// Cache storage errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem I/O failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A cache entry could not be serialized.
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Disk-backed response cache keyed by request fingerprint.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl ResponseCache {
    /// Creates a cache rooted at `dir` with no entry expiry.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: None,
        }
    }

    /// Creates a cache whose entries expire `ttl` after being written.
    #[must_use]
    pub fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl: Some(ttl),
        }
    }

    /// The cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fingerprint for a service URL + query pair.
    #[must_use]
    pub fn fingerprint(url: &str, query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
        hasher.update(query.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Path of the entry for a fingerprint.
    #[must_use]
    pub fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.{ENTRY_EXTENSION}"))
    }

    /// Looks up a cached table. Expired, unreadable or corrupt entries read
    /// as a miss rather than an error.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<Table> {
        let path = self.entry_path(fingerprint);
        let metadata = fs::metadata(&path).ok()?;
        if let Some(ttl) = self.ttl {
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())?;
            if age > ttl {
                debug!(path = %path.display(), "cache entry expired");
                return None;
            }
        }
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<Table>(&bytes) {
            Ok(table) => {
                debug!(path = %path.display(), "cache hit");
                Some(table)
            }
            Err(error) => {
                debug!(path = %path.display(), %error, "discarding corrupt cache entry");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Writes a table under the fingerprint. The entry is written to a
    /// `.part` file first and renamed so readers never see a torn entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when encoding or filesystem I/O fails.
    pub fn put(&self, fingerprint: &str, table: &Table) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let path = self.entry_path(fingerprint);
        let part = path.with_extension(format!("{ENTRY_EXTENSION}.part"));
        let bytes = serde_json::to_vec(table).map_err(CacheError::Encode)?;
        fs::write(&part, bytes).map_err(|e| CacheError::Io {
            path: part.clone(),
            source: e,
        })?;
        fs::rename(&part, &path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;
        debug!(path = %path.display(), "cached response");
        Ok(())
    }

    /// Removes every cache entry. Never partial: files that fail to delete
    /// surface as errors rather than leaving the cache half-cleared
    /// silently.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the directory listing or a removal
    /// fails.
    pub fn clear(&self) -> Result<usize, CacheError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            let is_entry = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == ENTRY_EXTENSION || e == "part");
            if !is_entry {
                continue;
            }
            fs::remove_file(&path).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
            removed += 1;
        }
        info!(removed, dir = %self.dir.display(), "cleared response cache");
        Ok(removed)
    }
}
