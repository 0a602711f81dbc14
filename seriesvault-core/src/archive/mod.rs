//! Archive storage: key format, store trait, on-disk container, path layout
//! and the line codec used inside entries.
//!
//! An archive is a single file holding named entries. Entries are addressed
//! with a composite key `{archive path}#{entry name}`.

pub mod disk;
pub mod layout;
pub mod line;

pub use disk::DiskArchiveStore;
pub use layout::ArchiveLayout;

use crate::error::CacheError;
use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Address of one entry inside one archive file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub path: PathBuf,
    pub entry: String,
}

impl ArchiveKey {
    pub fn new(path: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry: entry.into(),
        }
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.entry)
    }
}

impl FromStr for ArchiveKey {
    type Err = CacheError;

    /// Splits on the last `#`, so paths may contain the character but entry
    /// names may not.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('#') {
            Some((path, entry)) if !path.is_empty() && !entry.is_empty() => {
                Ok(ArchiveKey::new(path, entry))
            }
            _ => Err(CacheError::InvalidKey(s.to_string())),
        }
    }
}

/// BLAKE3 hex digest of entry bytes, for commit reports and logs.
pub fn entry_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Byte store over archive entries.
///
/// Implementations do not coordinate writers; callers mutating the same archive
/// concurrently must serialize through a [`crate::sync::KeySynchronizer`].
pub trait ArchiveStore: Send + Sync {
    /// Open an entry for reading. `Ok(None)` when the archive or entry is absent.
    fn fetch(&self, key: &ArchiveKey) -> Result<Option<Box<dyn BufRead + Send>>, CacheError>;

    /// Replace an entry's content, creating the archive if needed.
    fn store(&self, key: &ArchiveKey, data: &[u8]) -> Result<(), CacheError>;

    /// Add lines after the entry's current content without interpreting it.
    fn append(&self, key: &ArchiveKey, lines: &[String]) -> Result<(), CacheError>;

    /// Entry names held by an archive, sorted. Empty when the archive is absent.
    fn list_entries(&self, archive: &Path) -> Result<Vec<String>, CacheError>;
}
