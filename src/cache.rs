// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content-addressed disk cache.

Stores arbitrary byte values under a directory, keyed by strings. The
cache is best effort: read and write failures degrade to cache misses and
are logged rather than surfaced.
*/

use {
    sha2::{Digest, Sha256},
    std::{
        io::Write,
        path::{Path, PathBuf},
        time::{Duration, SystemTime},
    },
    tracing::{debug, warn},
};

/// How long an unused entry survives before [DiskCache::trim] evicts it.
const MAX_ENTRY_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A cache that stores byte values on disk.
///
/// The namespace separates different caches sharing one directory. The
/// stored filename is the SHA-256 of the namespace and key, so keys may be
/// arbitrary strings.
pub struct DiskCache {
    dir: PathBuf,
    namespace: String,
}

impl DiskCache {
    /// Open (creating if necessary) a cache in the given directory.
    pub fn new(dir: impl AsRef<Path>, namespace: impl ToString) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let cache = Self {
            dir,
            namespace: namespace.to_string(),
        };

        cache.trim();

        Ok(cache)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.as_bytes());

        self.dir.join(format!("{}.bin", hex::encode(hasher.finalize())))
    }

    /// Fetch the value stored under a key, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key);

        match std::fs::read(&path) {
            Ok(data) => {
                debug!(key, "cache hit");

                // Refresh the mtime so trim eviction tracks use, not creation.
                let _ = filetime_touch(&path);

                Some(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "error reading cached entry");
                None
            }
        }
    }

    /// Store a value under a key.
    ///
    /// The value is written to a unique temporary file and renamed into
    /// place, so concurrent writers are safe and readers never observe a
    /// partial entry. The last writer wins.
    pub fn set(&self, key: &str, value: &[u8]) {
        debug!(key, len = value.len(), "storing cache entry");

        if let Err(e) = self.set_inner(key, value) {
            warn!(key, error = %e, "error writing cache entry");
        }
    }

    fn set_inner(&self, key: &str, value: &[u8]) -> std::io::Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(value)?;
        file.flush()?;

        file.persist(self.entry_path(key)).map_err(|e| e.error)?;

        Ok(())
    }

    /// Evict entries that have not been used recently.
    pub fn trim(&self) {
        let cutoff = SystemTime::now() - MAX_ENTRY_AGE;

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "error scanning cache directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();

            if path.extension().map(|e| e != "bin").unwrap_or(true) {
                continue;
            }

            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|mtime| mtime < cutoff)
                .unwrap_or(false);

            if stale {
                debug!(path = %path.display(), "evicting stale cache entry");

                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "error evicting cache entry");
                }
            }
        }
    }
}

fn filetime_touch(path: &Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_times(std::fs::FileTimes::new().set_modified(SystemTime::now()))
}
