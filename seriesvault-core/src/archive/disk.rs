//! Archive store backed by single-file JSON containers.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Entries kept sorted by name, content stored verbatim
//! - Quarantine for corrupt containers ({filename}.quarantined) on write

use super::{ArchiveKey, ArchiveStore};
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Cursor};
use std::path::Path;

/// On-disk container: entry name → entry text.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ArchiveFile {
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskArchiveStore;

impl DiskArchiveStore {
    pub fn new() -> Self {
        Self
    }

    /// Read and parse a container. `Ok(None)` when the file does not exist.
    fn read_archive(path: &Path) -> Result<Option<ArchiveFile>, CacheError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::CorruptArchive {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Load a container for modification. A corrupt container is moved aside
    /// and replaced by an empty one.
    fn load_for_update(path: &Path) -> Result<ArchiveFile, CacheError> {
        match Self::read_archive(path) {
            Ok(archive) => Ok(archive.unwrap_or_default()),
            Err(CacheError::CorruptArchive { reason, .. }) => {
                let quarantine = path.with_extension("json.quarantined");
                tracing::warn!(
                    path = %path.display(),
                    %reason,
                    "quarantining corrupt archive"
                );
                fs::rename(path, &quarantine).map_err(|e| CacheError::io(path, e))?;
                Ok(ArchiveFile::default())
            }
            Err(e) => Err(e),
        }
    }

    fn write_archive(path: &Path, archive: &ArchiveFile) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(archive).map_err(|e| CacheError::CorruptArchive {
            path: path.to_path_buf(),
            reason: format!("serialize: {e}"),
        })?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes).map_err(|e| CacheError::io(&tmp_path, e))?;

        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::io(path, e)
        })
    }
}

fn utf8(key: &ArchiveKey, data: &[u8]) -> Result<String, CacheError> {
    String::from_utf8(data.to_vec()).map_err(|e| {
        CacheError::io(
            &key.path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

impl ArchiveStore for DiskArchiveStore {
    fn fetch(&self, key: &ArchiveKey) -> Result<Option<Box<dyn BufRead + Send>>, CacheError> {
        let Some(mut archive) = Self::read_archive(&key.path)? else {
            return Ok(None);
        };
        Ok(archive
            .entries
            .remove(&key.entry)
            .map(|text| Box::new(Cursor::new(text.into_bytes())) as Box<dyn BufRead + Send>))
    }

    fn store(&self, key: &ArchiveKey, data: &[u8]) -> Result<(), CacheError> {
        let text = utf8(key, data)?;
        let mut archive = Self::load_for_update(&key.path)?;
        archive.entries.insert(key.entry.clone(), text);
        Self::write_archive(&key.path, &archive)
    }

    fn append(&self, key: &ArchiveKey, lines: &[String]) -> Result<(), CacheError> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut archive = Self::load_for_update(&key.path)?;
        let entry = archive.entries.entry(key.entry.clone()).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(&lines.join("\n"));
        Self::write_archive(&key.path, &archive)
    }

    fn list_entries(&self, archive: &Path) -> Result<Vec<String>, CacheError> {
        Ok(Self::read_archive(archive)?
            .map(|a| a.entries.into_keys().collect())
            .unwrap_or_default())
    }
}
