//! Two-way synchronization between a plaintext directory and its encrypted mirror.

pub mod change;
pub mod log;
pub mod order;
pub mod pair;

use std::io;

use thiserror::Error;

use crate::dir::DirectoryError;
use crate::fs::file::FileError;

pub use change::{ChangeBuilder, PreSyncDetails, SyncMode, SyncOperation};
pub use log::{SyncLog, SyncLogEntry, SyncLogError};
pub use pair::{ConflictSide, DirectoryPair, PairOptions, SkipReason, SyncReporter, SyncResult, SyncSummary};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Log(#[from] SyncLogError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The target name exists on disk with different casing.
    #[error("Case conflict: '{expected}' collides with existing '{existing}'")]
    CaseConflict { expected: String, existing: String },

    /// An encrypted file's header names an entry whose name does not encode to it.
    ///
    /// **[INTEGRITY VIOLATION]** The file was renamed or swapped.
    #[error("[INTEGRITY VIOLATION] {encr_file_name} holds '{decr_file_name}', which does not derive to it")]
    NameMismatch {
        encr_file_name: String,
        decr_file_name: String,
    },

    #[error("Dependency cycle among pending changes: {}", .names.join(", "))]
    DependencyCycle { names: Vec<String> },
}

impl SyncError {
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            SyncError::File(e) | SyncError::Directory(DirectoryError::File(e)) => e.is_integrity_violation(),
            SyncError::NameMismatch { .. } => true,
            _ => false,
        }
    }
}
