use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::paths::{document_file_name, sanitize_key, DOCUMENT_EXTENSION};

/// Directory of `<key>.json` documents, each written whole and atomically.
#[derive(Debug, Clone)]
pub struct JsonDocumentStore<T> {
    root: PathBuf,
    _document: PhantomData<fn() -> T>,
}

impl<T> JsonDocumentStore<T>
where
    T: Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _document: PhantomData,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if sanitize_key(key).is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(document_file_name(key)))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).map(|path| path.is_file()).unwrap_or(false)
    }

    /// Returns `None` when no document exists under `key`.
    pub fn load(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::io("reading document", &path, source)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::json_parse(&path, source))
    }

    /// Writes to a sibling temp file, syncs it, then renames over the target.
    pub fn save(&self, key: &str, document: &T) -> Result<PathBuf, StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root)
            .map_err(|source| StoreError::io("creating store directory", &self.root, source))?;

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|source| StoreError::json_serialize(&path, source))?;

        let temp_path = self.root.join(format!(
            ".{}.{}.tmp",
            sanitize_key(key),
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(error) = write_synced(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(error);
        }

        if let Err(source) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io("replacing document", &path, source));
        }

        Ok(path)
    }

    /// Returns false when there was nothing to delete.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::io("deleting document", &path, source)),
        }
    }

    /// Sorted keys of every stored document. Temp files are skipped.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::io("listing documents", &self.root, source)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| StoreError::io("listing documents", &self.root, source))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            keys.push(stem.to_string());
        }

        keys.sort();
        Ok(keys)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file =
        File::create(path).map_err(|source| StoreError::io("creating temp file", path, source))?;
    file.write_all(bytes)
        .map_err(|source| StoreError::io("writing temp file", path, source))?;
    file.sync_all()
        .map_err(|source| StoreError::io("syncing temp file", path, source))
}

/// Current UTC time as RFC3339.
pub fn now_rfc3339() -> Result<String, StoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(StoreError::ClockFormat)
}
