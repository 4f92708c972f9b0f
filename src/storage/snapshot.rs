//! Snapshot Persistence
//!
//! `SAVE` dumps every `(key, Entry)` pair into a single file, replacing the
//! previous snapshot. At startup the file is read back record by record.
//!
//! ## File Layout
//!
//! The file is a plain sequence of bincode-encoded `(String, Entry)` records
//! with no header or footer. Loading stops quietly at the first record that
//! cannot be decoded, which is also how the end of the file is detected.
//!
//! ## Consistency
//!
//! Saving holds the read lock of every shard while the keyspace is copied,
//! so the file records one point-in-time view. The copy is then written
//! outside any lock.

use crate::storage::engine::{Entry, StorageEngine};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode entry {key}: {message}")]
    Encode { key: String, message: String },
}

/// Saves and restores the keyspace to and from one snapshot file.
#[derive(Debug)]
pub struct SnapshotStore {
    storage: Arc<StorageEngine>,
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(storage: Arc<StorageEngine>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole keyspace, replacing any previous snapshot.
    ///
    /// Returns the number of entries written.
    pub fn save(&self) -> Result<usize, SnapshotError> {
        let entries = self.storage.entries();
        let temp_path = self.temp_path();

        {
            let file = File::create(&temp_path).map_err(io_err(&temp_path))?;
            let mut writer = BufWriter::new(file);
            for (key, entry) in &entries {
                bincode::serialize_into(&mut writer, &(key, entry)).map_err(|e| {
                    SnapshotError::Encode {
                        key: key.clone(),
                        message: e.to_string(),
                    }
                })?;
            }
            writer.flush().map_err(io_err(&temp_path))?;
        }

        fs::rename(&temp_path, &self.path).map_err(io_err(&self.path))?;

        debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "Snapshot written"
        );
        Ok(entries.len())
    }

    /// Loads every readable record into the keyspace.
    ///
    /// A missing file restores nothing. Any read or decode failure ends the
    /// load without error, keeping the records read so far.
    pub fn load(&self) -> Result<usize, SnapshotError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found");
                return Ok(0);
            }
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };

        let mut reader = BufReader::new(file);
        let mut restored = 0;
        while let Ok((key, entry)) = bincode::deserialize_from::<_, (String, Entry)>(&mut reader)
        {
            self.storage.restore(key, entry);
            restored += 1;
        }

        info!(
            path = %self.path.display(),
            entries = restored,
            "Snapshot loaded"
        );
        Ok(restored)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SnapshotError {
    let path = path.display().to_string();
    move |source| SnapshotError::Io { path, source }
}
