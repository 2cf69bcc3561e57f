//! The state document on disk.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::model::Record;

use super::{PersistenceError, Result, StateStore};

/// A state store backed by one JSON file.
///
/// Every mutation rewrites the whole document to `<file>.tmp`, syncs it, and
/// renames it over the original. A crash at any point leaves either the old
/// or the new document in place, never a mix.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tmp_path: PathBuf,
    records: BTreeMap<String, Record>,
}

impl JsonFileStore {
    /// Open the document at `path`, creating `{}` if it doesn't exist.
    ///
    /// An empty or unparseable document is an error: it is never replaced.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tmp_path = tmp_path_for(&path);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match fs::remove_file(&tmp_path) {
            Ok(()) => warn!(path = %tmp_path.display(), "discarded unfinished write"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(PersistenceError::WriteFailed {
                    path: tmp_path,
                    source,
                });
            }
        }

        let records = match fs::read_to_string(&path) {
            Ok(json) => parse(&path, &json)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let store = Self {
                    path,
                    tmp_path,
                    records: BTreeMap::new(),
                };
                store.commit()?;
                info!(path = %store.path.display(), "created empty state file");
                return Ok(store);
            }
            Err(source) => return Err(PersistenceError::ReadFailed { path, source }),
        };

        debug!(path = %path.display(), records = records.len(), "state loaded");
        Ok(Self {
            path,
            tmp_path,
            records,
        })
    }

    /// Read the document at `path` without writing anything.
    ///
    /// A missing file reads as empty. Neither the document nor a pending
    /// temp file is touched, so this is safe while another process owns the
    /// store.
    pub fn read(path: &Path) -> Result<BTreeMap<String, Record>> {
        match fs::read_to_string(path) {
            Ok(json) => parse(path, &json),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(PersistenceError::ReadFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write the current records to disk.
    fn commit(&self) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(&self.records)?;
        json.push(b'\n');
        self.replace(&json)
            .map_err(|source| PersistenceError::WriteFailed {
                path: self.path.clone(),
                source,
            })
    }

    fn replace(&self, bytes: &[u8]) -> io::Result<()> {
        let mut file = File::create(&self.tmp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&self.tmp_path, &self.path) {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(e);
        }

        // The rename is committed; a failed directory sync only weakens it.
        if let Err(e) = sync_dir(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to sync state directory");
        }
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, id: &str) -> Option<Record> {
        self.records.get(id).cloned()
    }

    fn put(&mut self, id: &str, record: Record) -> Result<()> {
        let old = self.records.insert(id.to_string(), record);
        if let Err(e) = self.commit() {
            match old {
                Some(old) => self.records.insert(id.to_string(), old),
                None => self.records.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<Option<Record>> {
        let Some(old) = self.records.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.commit() {
            self.records.insert(id.to_string(), old);
            return Err(e);
        }
        Ok(Some(old))
    }

    fn records(&self) -> BTreeMap<String, Record> {
        self.records.clone()
    }

    fn flush(&mut self) -> Result<()> {
        self.commit()
    }
}

fn parse(path: &Path, json: &str) -> Result<BTreeMap<String, Record>> {
    let corrupt = |reason: String| PersistenceError::CorruptOnLoad {
        path: path.to_path_buf(),
        reason,
    };
    if json.trim().is_empty() {
        return Err(corrupt("file is empty".to_string()));
    }
    serde_json::from_str(json).map_err(|e| corrupt(e.to_string()))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| OsString::from("state"), OsString::from);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
