//! Logical file entries carried in the first block of every encrypted file.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use relative_path::{Component, RelativePath};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a logical entry currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Directory,
    /// Tombstone recording a deletion.
    Removed,
    /// The tombstone itself has been deleted; only ever seen in the sync log.
    Purged,
}

impl EntryType {
    /// Single-character flag used by the sync log.
    pub fn flag(self) -> char {
        match self {
            EntryType::File => 'F',
            EntryType::Directory => 'D',
            EntryType::Removed => '-',
            EntryType::Purged => '~',
        }
    }

    pub fn from_flag(flag: char) -> Option<Self> {
        match flag {
            'F' => Some(EntryType::File),
            'D' => Some(EntryType::Directory),
            '-' => Some(EntryType::Removed),
            '~' => Some(EntryType::Purged),
            _ => None,
        }
    }

    /// Whether the entry no longer exists on the plaintext side.
    pub fn is_removed(self) -> bool {
        matches!(self, EntryType::Removed | EntryType::Purged)
    }
}

/// Reasons a logical name is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidFileName {
    #[error("file name is empty")]
    Empty,
    #[error("file name must be relative")]
    Absolute,
    #[error("file name contains an empty, '.' or '..' segment")]
    BadSegment,
    #[error("file name contains forbidden character {0:?}")]
    ForbiddenChar(char),
}

/// Characters no replica may use, since some platforms cannot create them.
const FORBIDDEN_CHARS: [char; 8] = ['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Validate a relative, '/'-separated logical name.
pub fn validate_file_name(name: &str) -> Result<(), InvalidFileName> {
    if name.is_empty() {
        return Err(InvalidFileName::Empty);
    }
    if name.starts_with('/') {
        return Err(InvalidFileName::Absolute);
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control()) {
        return Err(InvalidFileName::ForbiddenChar(c));
    }
    if name.split('/').any(str::is_empty) {
        return Err(InvalidFileName::BadSegment);
    }
    let all_normal = RelativePath::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(InvalidFileName::BadSegment);
    }
    Ok(())
}

/// Join a logical name onto a platform root.
pub fn to_full_path(root: &Path, name: &str) -> PathBuf {
    RelativePath::new(name).to_logical_path(root)
}

/// Parent of a logical name, or `None` at the top level.
pub fn parent_name(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(parent, _)| parent)
}

/// Truncate to the millisecond precision stored on disk and in the log.
pub fn truncate_time(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(3)
}

pub fn modified_time(metadata: &Metadata) -> std::io::Result<DateTime<Utc>> {
    Ok(truncate_time(DateTime::<Utc>::from(metadata.modified()?)))
}

/// Metadata about one logical entry, serialized as the header block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileEntry {
    pub file_name: String,
    pub entry_type: EntryType,
    pub last_write_time_utc: DateTime<Utc>,
    pub length: u64,
}

impl FileEntry {
    pub fn file(file_name: impl Into<String>, modified: DateTime<Utc>, length: u64) -> Self {
        FileEntry {
            file_name: file_name.into(),
            entry_type: EntryType::File,
            last_write_time_utc: truncate_time(modified),
            length,
        }
    }

    pub fn directory(file_name: impl Into<String>, modified: DateTime<Utc>) -> Self {
        FileEntry {
            file_name: file_name.into(),
            entry_type: EntryType::Directory,
            last_write_time_utc: truncate_time(modified),
            length: 0,
        }
    }

    /// Tombstone stamped with the current time.
    pub fn removed(file_name: impl Into<String>) -> Self {
        FileEntry {
            file_name: file_name.into(),
            entry_type: EntryType::Removed,
            last_write_time_utc: truncate_time(Utc::now()),
            length: 0,
        }
    }

    /// Describe whatever currently exists at `path` under the logical `file_name`.
    pub fn from_path(path: &Path, file_name: &str) -> std::io::Result<Self> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(Self::directory(file_name, modified_time(&meta)?)),
            Ok(meta) => Ok(Self::file(file_name, modified_time(&meta)?, meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::removed(file_name)),
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<(), InvalidFileName> {
        validate_file_name(&self.file_name)
    }
}
