//! A plaintext directory paired with an encrypted directory.
//!
//! A pass is `find_changes` followed by `try_sync` on each returned change,
//! in order. Every applied change is recorded in the sync log, which is the
//! merge base for the next pass.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::SyncError;
use super::change::{ChangeBuilder, PreSyncDetails, SyncMode, SyncOperation};
use super::log::{SyncLog, SyncLogEntry};
use super::order::order_changes;
use crate::crypto::keys::{DerivedBytesProvider, FileVersion};
use crate::dir::{DecryptedDirectory, DirectoryError, EncryptedDirectory};
use crate::fs::cleanup::cleanup_tree;
use crate::fs::entry::{EntryType, FileEntry};
use crate::fs::file::{decrypt_file, encrypt_entry, encrypt_file};
use crate::fs::tree::{FsEntry, FsEntryKind, SimulatedMetadata, TreeOptions};

/// Options for opening a [`DirectoryPair`].
#[derive(Debug, Clone)]
pub struct PairOptions {
    /// Compute and report changes without touching either directory.
    pub what_if: bool,
    pub case_sensitive: bool,
    /// Times closer than this are equal.
    pub timestamp_resolution: Duration,
    /// Format used when initializing a new encrypted directory.
    pub file_version: FileVersion,
    /// Create the encrypted directory header when it does not exist.
    pub initialize: bool,
}

impl Default for PairOptions {
    fn default() -> Self {
        PairOptions {
            what_if: false,
            case_sensitive: !cfg!(any(windows, target_os = "macos")),
            timestamp_resolution: Duration::from_millis(1),
            file_version: FileVersion::V1,
            initialize: false,
        }
    }
}

impl PairOptions {
    #[must_use]
    pub fn what_if(mut self, what_if: bool) -> Self {
        self.what_if = what_if;
        self
    }

    #[must_use]
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    #[must_use]
    pub fn timestamp_resolution(mut self, resolution: Duration) -> Self {
        self.timestamp_resolution = resolution;
        self
    }

    #[must_use]
    pub fn file_version(mut self, version: FileVersion) -> Self {
        self.file_version = version;
        self
    }

    #[must_use]
    pub fn initialize(mut self, initialize: bool) -> Self {
        self.initialize = initialize;
        self
    }

    fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            case_sensitive: self.case_sensitive,
            what_if: self.what_if,
        }
    }
}

/// Which side wins when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    Decrypted,
    Encrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unchanged,
    Conflict,
}

/// Outcome of applying one change.
#[derive(Debug)]
pub enum SyncResult {
    /// Applied and recorded in the log.
    Synced(SyncLogEntry),
    Skipped(SkipReason),
    Failed(SyncError),
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Synced(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncResult::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Counts for one [`DirectoryPair::sync_all`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub conflicts: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncSummary {
    fn record(&mut self, result: &SyncResult) {
        match result {
            SyncResult::Synced(_) => self.synced += 1,
            SyncResult::Skipped(SkipReason::Conflict) => self.conflicts += 1,
            SyncResult::Skipped(SkipReason::Unchanged) => self.skipped += 1,
            SyncResult::Failed(_) => self.failed += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.conflicts == 0
    }
}

/// Receives each change and its outcome during [`DirectoryPair::sync_all`].
pub trait SyncReporter {
    fn report(&mut self, change: &PreSyncDetails, result: &SyncResult);
}

impl<F: FnMut(&PreSyncDetails, &SyncResult)> SyncReporter for F {
    fn report(&mut self, change: &PreSyncDetails, result: &SyncResult) {
        self(change, result)
    }
}

pub struct DirectoryPair {
    decr: DecryptedDirectory,
    encr: EncryptedDirectory,
    log: SyncLog,
    options: PairOptions,
    resolution: TimeDelta,
    rng: Box<dyn RngCore + Send>,
}

impl DirectoryPair {
    /// Open a pair, recovering interrupted writes in both trees first.
    #[instrument(level = "debug", skip(provider, options))]
    pub fn open(
        decr_root: &Path,
        encr_root: &Path,
        provider: Arc<DerivedBytesProvider>,
        options: PairOptions,
    ) -> Result<Self, SyncError> {
        let tree_options = options.tree_options();
        if !options.what_if {
            std::fs::create_dir_all(decr_root)?;
            for root in [encr_root, decr_root] {
                cleanup_tree(root)?;
            }
        }

        let encr = if EncryptedDirectory::is_initialized(encr_root) {
            EncryptedDirectory::open(encr_root, provider, tree_options)?
        } else if options.initialize {
            EncryptedDirectory::initialize(encr_root, provider, options.file_version, tree_options)?
        } else {
            return Err(DirectoryError::NotInitialized {
                path: encr_root.to_path_buf(),
            }
            .into());
        };
        let decr = DecryptedDirectory::new(decr_root, tree_options);
        let log = SyncLog::open(&decr.sync_log_path(encr.directory_id()), options.what_if)?;
        let resolution = TimeDelta::from_std(options.timestamp_resolution).unwrap_or(TimeDelta::milliseconds(1));

        info!(
            decrypted = %decr_root.display(),
            encrypted = %encr_root.display(),
            directory_id = %encr.directory_id(),
            log_entries = log.len(),
            what_if = options.what_if,
            "Opened directory pair"
        );
        Ok(DirectoryPair {
            decr,
            encr,
            log,
            options,
            resolution,
            rng: Box::new(StdRng::from_os_rng()),
        })
    }

    /// Replace the generator used to pick among independent changes.
    #[must_use]
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn decrypted_root(&self) -> &Path {
        self.decr.root()
    }

    pub fn encrypted_root(&self) -> &Path {
        self.encr.root()
    }

    pub fn directory_id(&self) -> Uuid {
        self.encr.directory_id()
    }

    pub fn options(&self) -> &PairOptions {
        &self.options
    }

    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// Drop cached tree state and re-read the log.
    pub fn reset(&mut self) -> Result<(), SyncError> {
        self.decr.tree().reset();
        self.encr.tree().reset();
        self.log.reload()?;
        Ok(())
    }

    /// Every row of the three-way join, unchanged rows included, sorted by name.
    pub fn status(&mut self, reset: bool) -> Result<Vec<PreSyncDetails>, SyncError> {
        if reset {
            self.reset()?;
        }
        let decr_entries = self.decr.tree().entries()?;
        let encr_entries = self.encr.entries()?;
        let encr = &self.encr;
        let builder = ChangeBuilder::new(encr.encoder(), self.resolution);
        Ok(builder.build(self.log.entries(), decr_entries, encr_entries, |name| {
            encr.read_header(name)
        }))
    }

    /// Pending changes in an order that satisfies their dependencies.
    #[instrument(level = "debug", skip(self))]
    pub fn find_changes(&mut self, reset: bool) -> Result<Vec<PreSyncDetails>, SyncError> {
        let changes: Vec<_> = self
            .status(reset)?
            .into_iter()
            .filter(|c| c.sync_mode != SyncMode::Unchanged)
            .collect();
        let ordered = order_changes(changes, &mut *self.rng)?;
        debug!(count = ordered.len(), "Found changes");
        Ok(ordered)
    }

    /// Apply one change. Conflicts are skipped; see [`Self::resolve_conflict`].
    pub fn try_sync(&mut self, change: &PreSyncDetails) -> SyncResult {
        let outcome = match (change.sync_mode, change.operation) {
            (SyncMode::Unchanged, _) => return SyncResult::Skipped(SkipReason::Unchanged),
            (SyncMode::Conflict, _) => {
                warn!(name = %change.display_name(), "Conflict needs resolution, skipping");
                return SyncResult::Skipped(SkipReason::Conflict);
            }
            (SyncMode::DecryptedSide, _) => self.encrypt_change(change),
            (SyncMode::EncryptedSide, SyncOperation::Purge) => self.purge(change),
            (SyncMode::EncryptedSide, _) => self.decrypt_change(change),
            (SyncMode::Match, _) => self.record_match(change),
        };
        self.finish(change, outcome)
    }

    /// Apply a conflicting change, letting `side` win.
    pub fn resolve_conflict(&mut self, change: &PreSyncDetails, side: ConflictSide) -> SyncResult {
        let outcome = match side {
            ConflictSide::Decrypted => self.encrypt_change(change),
            ConflictSide::Encrypted if change.encr_entry.is_some() => self.decrypt_change(change),
            ConflictSide::Encrypted => self.remove_plaintext(change),
        };
        self.finish(change, outcome)
    }

    /// Rescan both trees, then apply every pending change, reporting each outcome.
    pub fn sync_all(&mut self, reporter: &mut dyn SyncReporter) -> Result<SyncSummary, SyncError> {
        let changes = self.find_changes(true)?;
        let mut summary = SyncSummary::default();
        for change in &changes {
            let result = self.try_sync(change);
            summary.record(&result);
            reporter.report(change, &result);
        }
        info!(
            synced = summary.synced,
            conflicts = summary.conflicts,
            failed = summary.failed,
            "Sync pass complete"
        );
        Ok(summary)
    }

    fn finish(&mut self, change: &PreSyncDetails, outcome: Result<SyncLogEntry, SyncError>) -> SyncResult {
        match outcome {
            Ok(entry) => {
                info!(change = %change, "Synced");
                SyncResult::Synced(entry)
            }
            Err(e) => {
                warn!(change = %change, error = %e, "Sync failed");
                SyncResult::Failed(e)
            }
        }
    }

    /// The plaintext entry with exactly this name, ignoring case-insensitive matches.
    fn exact_decr_entry(&mut self, name: &str) -> Result<Option<FsEntry>, SyncError> {
        Ok(self.decr.tree().try_get_entry(name)?.filter(|e| e.name == name))
    }

    fn record(&mut self, entry: SyncLogEntry) -> Result<SyncLogEntry, SyncError> {
        self.log.add(entry.clone())?;
        Ok(entry)
    }

    fn encrypt_change(&mut self, change: &PreSyncDetails) -> Result<SyncLogEntry, SyncError> {
        let name = change.decr_file_name.as_str();
        let encr_name = change.encr_file_name.as_str();
        let live = self.exact_decr_entry(name)?;
        let mut entry = match &live {
            Some(e) if e.is_dir() => FileEntry::directory(name, e.last_write_time_utc),
            Some(e) => FileEntry::file(name, e.last_write_time_utc, e.length),
            None => FileEntry::removed(name),
        };

        let previous = self.encr.tree().try_get_entry(encr_name)?.map(|e| e.last_write_time_utc);
        let decr_path = self.decr.tree().full_path(name);
        let provider = Arc::clone(self.encr.provider());
        let version = self.encr.version();
        let simulated = SimulatedMetadata {
            kind: FsEntryKind::File,
            last_write_time_utc: Utc::now(),
            length: 0,
        };
        let mut written = self.encr.tree().write_entry(encr_name, simulated, |path| -> Result<(), SyncError> {
            entry = if live.is_some() {
                encrypt_file(&decr_path, name, path, &provider, version)?
            } else {
                encrypt_entry(&entry, std::io::empty(), path, &provider, version)?;
                entry.clone()
            };
            Ok(())
        })?;

        // The encrypted mtime must move past every value a replica may have logged.
        let floor = [previous, self.log.get(name, encr_name).and_then(|l| l.encr_modified)]
            .into_iter()
            .flatten()
            .max();
        if let Some(floor) = floor
            && written.last_write_time_utc < floor + self.resolution
        {
            written = self.encr.tree().set_last_write_time(encr_name, floor + self.resolution)?;
        }

        let entry_type = if entry.entry_type == EntryType::Purged {
            EntryType::Removed
        } else {
            entry.entry_type
        };
        self.record(SyncLogEntry {
            entry_type,
            decr_file_name: name.to_string(),
            decr_modified: (entry_type == EntryType::File).then_some(entry.last_write_time_utc),
            encr_file_name: encr_name.to_string(),
            encr_modified: Some(written.last_write_time_utc),
        })
    }

    fn decrypt_change(&mut self, change: &PreSyncDetails) -> Result<SyncLogEntry, SyncError> {
        // deleted outright, so there is no header to read
        if change.encr_entry.is_none() {
            return self.remove_plaintext(change);
        }
        let encr_name = change.encr_file_name.as_str();
        let header = self.encr.read_header(encr_name)?;
        if self.encr.encode_name(&header.file_name) != encr_name {
            return Err(SyncError::NameMismatch {
                encr_file_name: encr_name.to_string(),
                decr_file_name: header.file_name,
            });
        }
        let name = header.file_name.as_str();
        if let Some(existing) = self.decr.tree().try_get_entry(name)?
            && existing.name != name
        {
            return Err(SyncError::CaseConflict {
                expected: name.to_string(),
                existing: existing.name,
            });
        }

        let (entry_type, decr_modified) = match header.entry_type {
            EntryType::File => {
                let encr_path = self.encr.encr_path(encr_name);
                let provider = Arc::clone(self.encr.provider());
                let simulated = SimulatedMetadata {
                    kind: FsEntryKind::File,
                    last_write_time_utc: header.last_write_time_utc,
                    length: header.length,
                };
                let written = self.decr.tree().write_entry(name, simulated, |dest| -> Result<(), SyncError> {
                    decrypt_file(&encr_path, dest, &provider)?;
                    Ok(())
                })?;
                (EntryType::File, Some(written.last_write_time_utc))
            }
            EntryType::Directory => {
                self.decr.tree().create_directory(name)?;
                (EntryType::Directory, None)
            }
            EntryType::Removed | EntryType::Purged => {
                self.decr.tree().delete(name)?;
                (EntryType::Removed, None)
            }
        };

        let encr_modified = self.encr.tree().try_get_entry(encr_name)?.map(|e| e.last_write_time_utc);
        self.record(SyncLogEntry {
            entry_type,
            decr_file_name: header.file_name.clone(),
            decr_modified,
            encr_file_name: encr_name.to_string(),
            encr_modified,
        })
    }

    /// Forget a tombstone whose encrypted file has been deleted.
    fn purge(&mut self, change: &PreSyncDetails) -> Result<SyncLogEntry, SyncError> {
        self.record(SyncLogEntry {
            entry_type: EntryType::Purged,
            decr_file_name: change.decr_file_name.clone(),
            decr_modified: None,
            encr_file_name: change.encr_file_name.clone(),
            encr_modified: None,
        })
    }

    /// Both sides already agree; record their current state.
    fn record_match(&mut self, change: &PreSyncDetails) -> Result<SyncLogEntry, SyncError> {
        let decr = self.exact_decr_entry(&change.decr_file_name)?;
        let encr = self.encr.tree().try_get_entry(&change.encr_file_name)?;
        let (entry_type, decr_modified) = match (decr, &encr) {
            (Some(e), _) if e.is_dir() => (EntryType::Directory, None),
            (Some(e), _) => (EntryType::File, Some(e.last_write_time_utc)),
            (None, Some(_)) => (EntryType::Removed, None),
            (None, None) => (EntryType::Purged, None),
        };
        self.record(SyncLogEntry {
            entry_type,
            decr_file_name: change.decr_file_name.clone(),
            decr_modified,
            encr_file_name: change.encr_file_name.clone(),
            encr_modified: encr.map(|e| e.last_write_time_utc),
        })
    }

    /// Follow an encrypted file that was deleted without leaving a tombstone.
    ///
    /// With nothing left on either side the log entry is purged outright.
    fn remove_plaintext(&mut self, change: &PreSyncDetails) -> Result<SyncLogEntry, SyncError> {
        if self.exact_decr_entry(&change.decr_file_name)?.is_some() {
            self.decr.tree().delete(&change.decr_file_name)?;
        }
        self.record(SyncLogEntry {
            entry_type: EntryType::Purged,
            decr_file_name: change.decr_file_name.clone(),
            decr_modified: None,
            encr_file_name: change.encr_file_name.clone(),
            encr_modified: None,
        })
    }
}

impl std::fmt::Debug for DirectoryPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryPair")
            .field("decrypted_root", &self.decr.root())
            .field("encrypted_root", &self.encr.root())
            .field("directory_id", &self.encr.directory_id())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
