// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::error::{KvError, Result};
use crate::kv::{PersistentKv, footprint};

/// A persistent tier backed by a single JSON document on disk.
///
/// The whole key space lives in memory and is written back after every mutation: first to a
/// uniquely named temporary file in the same directory, then renamed over the document, so a crash never leaves a torn
/// file behind. A missing document starts empty; a corrupt one is logged and replaced on
/// the next write.
///
/// # Examples
///
/// ```no_run
/// use syncwell_store::{FileKv, TieredStore};
///
/// # fn main() -> Result<(), syncwell_store::KvError> {
/// let kv = FileKv::open("/var/tmp/app-cache.json")?.with_quota(5 * 1024 * 1024);
/// let store = TieredStore::builder().persistent(kv).build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileKv {
    path: PathBuf,
    quota: Option<usize>,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileKv {
    /// Opens (or lazily creates) the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Io`] if an existing document cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                tracing::warn!(
                    store.path = %path.display(),
                    error = %error,
                    "discarding unreadable persistent cache document"
                );
                BTreeMap::new()
            }),
            Err(error) if error.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path,
            quota: None,
            data: Mutex::new(data),
        })
    }

    /// Limits the document to `quota` bytes of keys and values.
    #[must_use]
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Returns the location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_document(&self, data: &BTreeMap<String, String>) -> Result<()> {
        let encoded = serde_json::to_vec(data)?;
        let parent = match self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let mut staging = NamedTempFile::new_in(parent)?;
        staging.write_all(&encoded)?;
        staging.persist(&self.path).map_err(|error| error.error)?;
        Ok(())
    }

    /// Applies `change` to a copy of the key space and commits it only if the write succeeds.
    fn commit(&self, data: &mut BTreeMap<String, String>, change: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut next = data.clone();
        change(&mut next);
        self.write_document(&next)?;
        *data = next;
        Ok(())
    }
}

impl PersistentKv for FileKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock();
        if let Some(quota) = self.quota {
            let others = footprint(data.iter().filter(|(existing, _)| existing.as_str() != key));
            if others + key.len() + value.len() > quota {
                return Err(KvError::QuotaExceeded);
            }
        }
        self.commit(&mut data, |data| {
            data.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut data = self.data.lock();
        if !data.contains_key(key) {
            return Ok(());
        }
        self.commit(&mut data, |data| {
            data.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }
}
