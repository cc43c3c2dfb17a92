//! Three-way join of sync log, plaintext tree and encrypted tree, and the
//! per-row classification that decides what a sync pass does.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::log::SyncLogEntry;
use crate::dir::name::FileNameEncoder;
use crate::fs::entry::{EntryType, FileEntry};
use crate::fs::file::FileError;
use crate::fs::tree::FsEntry;

/// Which side a row's change flows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    Unchanged,
    /// Both sides changed to the same state; only the log needs updating.
    Match,
    /// Plaintext changed; encrypt.
    DecryptedSide,
    /// Encrypted file changed; decrypt.
    EncryptedSide,
    /// Both sides changed differently; needs an operator decision.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    None,
    Add,
    Change,
    Remove,
    Purge,
    Match,
    Conflict,
}

impl SyncOperation {
    pub fn glyph(self) -> char {
        match self {
            SyncOperation::None => ' ',
            SyncOperation::Add => '+',
            SyncOperation::Change => '*',
            SyncOperation::Remove => '-',
            SyncOperation::Purge => 'x',
            SyncOperation::Match => '=',
            SyncOperation::Conflict => '!',
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOperation::None => "none",
            SyncOperation::Add => "add",
            SyncOperation::Change => "change",
            SyncOperation::Remove => "remove",
            SyncOperation::Purge => "purge",
            SyncOperation::Match => "match",
            SyncOperation::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// One logical entry as seen by a sync pass.
#[derive(Debug, Clone)]
pub struct PreSyncDetails {
    /// Logical name. Empty when only an undecryptable encrypted file is known.
    pub decr_file_name: String,
    pub encr_file_name: String,
    pub log_entry: Option<SyncLogEntry>,
    pub decr_entry: Option<FsEntry>,
    pub encr_entry: Option<FsEntry>,
    /// Header of the encrypted file, read when it changed since the log.
    pub encr_header: Option<FileEntry>,
    /// Why the header could not be read, if it could not.
    pub header_error: Option<String>,
    pub sync_mode: SyncMode,
    pub operation: SyncOperation,
}

impl PreSyncDetails {
    fn new(decr_file_name: String, encr_file_name: String) -> Self {
        PreSyncDetails {
            decr_file_name,
            encr_file_name,
            log_entry: None,
            decr_entry: None,
            encr_entry: None,
            encr_header: None,
            header_error: None,
            sync_mode: SyncMode::Unchanged,
            operation: SyncOperation::None,
        }
    }

    /// Name to show to a user.
    pub fn display_name(&self) -> &str {
        if self.decr_file_name.is_empty() {
            &self.encr_file_name
        } else {
            &self.decr_file_name
        }
    }

    pub fn direction(&self) -> &'static str {
        match self.sync_mode {
            SyncMode::Unchanged => "  ",
            SyncMode::Match => "==",
            SyncMode::DecryptedSide => "=>",
            SyncMode::EncryptedSide => "<=",
            SyncMode::Conflict => "<>",
        }
    }
}

impl fmt::Display for PreSyncDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operation.glyph(), self.direction(), self.display_name())
    }
}

/// Whether two optional times agree within `resolution`.
pub fn times_match(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>, resolution: TimeDelta) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() < resolution,
        _ => false,
    }
}

/// Observed plaintext state: type, modification time (files only) and length.
type DecrState = (EntryType, Option<DateTime<Utc>>, u64);

fn decr_state(entry: Option<&FsEntry>) -> Option<DecrState> {
    entry.map(|e| {
        if e.is_dir() {
            (EntryType::Directory, None, 0)
        } else {
            (EntryType::File, Some(e.last_write_time_utc), e.length)
        }
    })
}

/// Builds and classifies the rows of one sync pass.
pub struct ChangeBuilder<'a> {
    encoder: &'a FileNameEncoder,
    resolution: TimeDelta,
}

impl<'a> ChangeBuilder<'a> {
    pub fn new(encoder: &'a FileNameEncoder, resolution: TimeDelta) -> Self {
        ChangeBuilder { encoder, resolution }
    }

    /// Join the three sources into rows, refresh stale headers through
    /// `read_header` and classify every row.
    ///
    /// Rows come back sorted by logical name; unchanged rows are included.
    pub fn build<'l, F>(
        &self,
        log: impl IntoIterator<Item = &'l SyncLogEntry>,
        decr_entries: Vec<FsEntry>,
        encr_entries: Vec<FsEntry>,
        mut read_header: F,
    ) -> Vec<PreSyncDetails>
    where
        F: FnMut(&str) -> Result<FileEntry, FileError>,
    {
        let mut rows: Vec<PreSyncDetails> = Vec::new();
        let mut by_decr: HashMap<String, usize> = HashMap::new();
        let mut by_encr: HashMap<String, usize> = HashMap::new();

        let mut log_entries: Vec<&SyncLogEntry> = log.into_iter().collect();
        log_entries.sort_by(|a, b| a.decr_file_name.cmp(&b.decr_file_name));
        for entry in log_entries {
            let mut row = PreSyncDetails::new(entry.decr_file_name.clone(), entry.encr_file_name.clone());
            row.log_entry = Some(entry.clone());
            by_decr.insert(row.decr_file_name.clone(), rows.len());
            by_encr.insert(row.encr_file_name.clone(), rows.len());
            rows.push(row);
        }

        for entry in decr_entries {
            if let Some(&i) = by_decr.get(&entry.name) {
                rows[i].decr_entry = Some(entry);
                continue;
            }
            let encr_name = self.encoder.encode_name(&entry.name);
            let mut row = PreSyncDetails::new(entry.name.clone(), encr_name);
            row.decr_entry = Some(entry);
            by_decr.insert(row.decr_file_name.clone(), rows.len());
            by_encr.insert(row.encr_file_name.clone(), rows.len());
            rows.push(row);
        }

        for entry in encr_entries.into_iter().filter(FsEntry::is_file) {
            if let Some(&i) = by_encr.get(&entry.name) {
                rows[i].encr_entry = Some(entry);
                continue;
            }
            let mut row = PreSyncDetails::new(String::new(), entry.name.clone());
            row.encr_entry = Some(entry);
            by_encr.insert(row.encr_file_name.clone(), rows.len());
            rows.push(row);
        }

        for row in &mut rows {
            self.refresh_header(row, &mut read_header);
            let (mode, operation) = self.classify(row);
            row.sync_mode = mode;
            row.operation = operation;
        }
        rows.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.encr_file_name.cmp(&b.encr_file_name))
        });
        rows
    }

    fn refresh_header<F>(&self, row: &mut PreSyncDetails, read_header: &mut F)
    where
        F: FnMut(&str) -> Result<FileEntry, FileError>,
    {
        let Some(encr) = row.encr_entry.as_ref() else {
            return;
        };
        let stale = row.log_entry.as_ref().is_none_or(|log| {
            !times_match(Some(encr.last_write_time_utc), log.encr_modified, self.resolution)
        });
        if !stale {
            return;
        }

        match read_header(&row.encr_file_name) {
            Ok(header) if self.encoder.encode_name(&header.file_name) != row.encr_file_name => {
                warn!(encr = %row.encr_file_name, claimed = %header.file_name, "Header name does not derive to its file");
                row.header_error = Some(format!(
                    "header names '{}', which does not derive to this file",
                    header.file_name
                ));
            }
            Ok(header) => {
                if row.decr_file_name.is_empty() {
                    row.decr_file_name = header.file_name.clone();
                }
                row.encr_header = Some(header);
            }
            Err(e) => {
                warn!(encr = %row.encr_file_name, error = %e, "Failed to read encrypted header");
                row.header_error = Some(e.to_string());
            }
        }
    }

    /// Decide the sync mode and operation of one row.
    pub fn classify(&self, row: &PreSyncDetails) -> (SyncMode, SyncOperation) {
        let log = row.log_entry.as_ref();
        let decr = decr_state(row.decr_entry.as_ref());
        let log_live = log.is_some_and(|l| !l.entry_type.is_removed());

        let decr_changed = match (log, decr) {
            (None, decr) => decr.is_some(),
            (Some(l), decr) if l.entry_type.is_removed() => decr.is_some(),
            (Some(_), None) => true,
            (Some(l), Some((ty, modified, _))) => {
                ty != l.entry_type
                    || (ty == EntryType::File && !times_match(modified, l.decr_modified, self.resolution))
            }
        };

        let encr_present = row.encr_entry.is_some();
        let purge_pending = !encr_present && log.is_some_and(|l| l.entry_type == EntryType::Removed);
        let encr_changed = !purge_pending
            && match log {
                None => encr_present,
                Some(l) => !times_match(
                    row.encr_entry.as_ref().map(|e| e.last_write_time_utc),
                    l.encr_modified,
                    self.resolution,
                ),
            };

        let mode = match (decr_changed, encr_changed) {
            (false, false) if purge_pending => SyncMode::EncryptedSide,
            (false, false) => SyncMode::Unchanged,
            (true, false) => SyncMode::DecryptedSide,
            (false, true) => SyncMode::EncryptedSide,
            (true, true) if self.states_equal(decr, row) => SyncMode::Match,
            (true, true) => SyncMode::Conflict,
        };

        let operation = match mode {
            SyncMode::Unchanged => SyncOperation::None,
            SyncMode::Match => SyncOperation::Match,
            SyncMode::Conflict => SyncOperation::Conflict,
            SyncMode::DecryptedSide => match decr {
                None => SyncOperation::Remove,
                Some(_) if log_live => SyncOperation::Change,
                Some(_) => SyncOperation::Add,
            },
            SyncMode::EncryptedSide if purge_pending => SyncOperation::Purge,
            SyncMode::EncryptedSide if !encr_present => SyncOperation::Remove,
            SyncMode::EncryptedSide => match row.encr_header.as_ref().map(|h| h.entry_type) {
                Some(ty) if ty.is_removed() => SyncOperation::Remove,
                _ if log_live || decr.is_some() => SyncOperation::Change,
                _ => SyncOperation::Add,
            },
        };

        if mode != SyncMode::Unchanged {
            debug!(name = %row.display_name(), ?mode, %operation, "Classified change");
        }
        (mode, operation)
    }

    fn states_equal(&self, decr: Option<DecrState>, row: &PreSyncDetails) -> bool {
        if row.encr_entry.is_none() {
            return decr.is_none();
        }
        let Some(header) = row.encr_header.as_ref() else {
            return false;
        };
        match (decr, header.entry_type) {
            (None, ty) => ty.is_removed(),
            (Some((EntryType::Directory, _, _)), EntryType::Directory) => true,
            (Some((EntryType::File, modified, length)), EntryType::File) => {
                length == header.length
                    && times_match(modified, Some(header.last_write_time_utc), self.resolution)
            }
            _ => false,
        }
    }
}
