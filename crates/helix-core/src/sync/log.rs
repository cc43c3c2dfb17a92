//! Append-only sync log: the merge base of a directory pair.
//!
//! One line per accepted change:
//!
//! ```text
//! F 20240101t120000000 "docs/a.txt" 20240101t120001500 "3f2a...e9.hx"
//! ```
//!
//! The file is replayed on open; later lines win. `Purged` lines drop their key
//! from the in-memory index. Lines that do not parse are skipped.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;
use tracing::{debug, trace};

use crate::fs::entry::{EntryType, truncate_time};

const TIME_FORMAT: &str = "%Y%m%dt%H%M%S%3f";
const ZERO_TIME: &str = "00000000t000000000";
const LOG_PREAMBLE: &str = "# helix sync log v1";

#[derive(Error, Debug)]
pub enum SyncLogError {
    #[error("Failed to open sync log {}: {source}", .path.display())]
    Open {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
    #[error("Failed to append to sync log {}: {source}", .path.display())]
    Append {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// One accepted state of a logical entry on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLogEntry {
    pub entry_type: EntryType,
    pub decr_file_name: String,
    /// Plaintext modification time; `None` for directories and removed entries.
    pub decr_modified: Option<DateTime<Utc>>,
    pub encr_file_name: String,
    /// Encrypted file modification time; `None` when no encrypted file exists.
    pub encr_modified: Option<DateTime<Utc>>,
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format(TIME_FORMAT).to_string(),
        None => ZERO_TIME.to_string(),
    }
}

fn parse_time(token: &str) -> Option<Option<DateTime<Utc>>> {
    if token == ZERO_TIME {
        return Some(None);
    }
    let (date, time) = token.split_once('t')?;
    if date.len() != 8 || time.len() != 9 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let field = |range: std::ops::Range<usize>| time[range].parse::<u32>().ok();
    let time = NaiveTime::from_hms_milli_opt(field(0..2)?, field(2..4)?, field(4..6)?, field(6..9)?)?;
    Some(Some(date.and_time(time).and_utc()))
}

fn quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Cursor over one log line.
struct LineParser<'a> {
    rest: &'a str,
}

impl<'a> LineParser<'a> {
    fn token(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start_matches(' ');
        let end = trimmed.find(' ').unwrap_or(trimmed.len());
        let (token, rest) = trimmed.split_at(end);
        self.rest = rest;
        (!token.is_empty()).then_some(token)
    }

    fn quoted(&mut self) -> Option<String> {
        let trimmed = self.rest.trim_start_matches(' ');
        let mut chars = trimmed.char_indices();
        if chars.next()?.1 != '"' {
            return None;
        }
        let mut out = String::new();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => out.push(chars.next()?.1),
                '"' => {
                    self.rest = &trimmed[i + 1..];
                    return Some(out);
                }
                c => out.push(c),
            }
        }
        None
    }

    fn at_end(&self) -> bool {
        self.rest.trim().is_empty()
    }
}

impl SyncLogEntry {
    /// Identity key of the entry.
    pub fn key(&self) -> (String, String) {
        (self.decr_file_name.clone(), self.encr_file_name.clone())
    }

    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.entry_type.flag(),
            format_time(self.decr_modified),
            quote(&self.decr_file_name),
            format_time(self.encr_modified),
            quote(&self.encr_file_name),
        )
    }

    /// Parse one line. Comments, blank lines and malformed lines yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim_start().starts_with('#') {
            return None;
        }
        let mut parser = LineParser { rest: line };
        let flag = parser.token()?;
        let mut flag_chars = flag.chars();
        let entry_type = EntryType::from_flag(flag_chars.next()?)?;
        if flag_chars.next().is_some() {
            return None;
        }
        let decr_modified = parse_time(parser.token()?)?;
        let decr_file_name = parser.quoted()?;
        let encr_modified = parse_time(parser.token()?)?;
        let encr_file_name = parser.quoted()?;
        if !parser.at_end() {
            return None;
        }
        Some(SyncLogEntry {
            entry_type,
            decr_file_name,
            decr_modified: decr_modified.map(truncate_time),
            encr_file_name,
            encr_modified: encr_modified.map(truncate_time),
        })
    }
}

/// Replayed sync log with an open append handle.
pub struct SyncLog {
    path: PathBuf,
    writer: Option<File>,
    entries: HashMap<(String, String), SyncLogEntry>,
    by_decr_name: HashMap<String, (String, String)>,
}

impl SyncLog {
    /// Replay the log at `path`, creating it unless `what_if` is set.
    ///
    /// In what-if mode appends only update the in-memory index.
    pub fn open(path: &Path, what_if: bool) -> Result<Self, SyncLogError> {
        let open_err = |source: io::Error| SyncLogError::Open {
            source,
            path: path.to_path_buf(),
        };

        let mut log = SyncLog {
            path: path.to_path_buf(),
            writer: None,
            entries: HashMap::new(),
            by_decr_name: HashMap::new(),
        };
        log.replay().map_err(open_err)?;

        if !what_if {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(open_err)?;
            }
            let is_new = !path.exists();
            let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(open_err)?;
            if is_new {
                writeln!(file, "{LOG_PREAMBLE}").map_err(open_err)?;
            }
            log.writer = Some(file);
        }
        debug!(path = %path.display(), entries = log.entries.len(), what_if, "Opened sync log");
        Ok(log)
    }

    fn replay(&mut self) -> io::Result<()> {
        self.entries.clear();
        self.by_decr_name.clear();
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            match SyncLogEntry::parse_line(&line) {
                Some(entry) => self.apply(entry),
                None if line.trim().is_empty() || line.trim_start().starts_with('#') => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "Skipped malformed sync log lines");
        }
        Ok(())
    }

    /// Re-read the log file, discarding in-memory state.
    pub fn reload(&mut self) -> Result<(), SyncLogError> {
        self.replay().map_err(|source| SyncLogError::Open {
            source,
            path: self.path.clone(),
        })
    }

    fn apply(&mut self, entry: SyncLogEntry) {
        let key = entry.key();
        if entry.entry_type == EntryType::Purged {
            self.entries.remove(&key);
            if self.by_decr_name.get(&entry.decr_file_name) == Some(&key) {
                self.by_decr_name.remove(&entry.decr_file_name);
            }
        } else {
            self.by_decr_name.insert(entry.decr_file_name.clone(), key.clone());
            self.entries.insert(key, entry);
        }
    }

    /// Record a change: append its line (unless what-if) and update the index.
    pub fn add(&mut self, entry: SyncLogEntry) -> Result<(), SyncLogError> {
        if let Some(writer) = self.writer.as_mut() {
            let line = entry.to_line();
            writeln!(writer, "{line}")
                .and_then(|()| writer.flush())
                .map_err(|source| SyncLogError::Append {
                    source,
                    path: self.path.clone(),
                })?;
            trace!(%line, "Appended sync log entry");
        }
        self.apply(entry);
        Ok(())
    }

    pub fn find_by_decr_name(&self, decr_file_name: &str) -> Option<&SyncLogEntry> {
        self.by_decr_name
            .get(decr_file_name)
            .and_then(|key| self.entries.get(key))
    }

    pub fn get(&self, decr_file_name: &str, encr_file_name: &str) -> Option<&SyncLogEntry> {
        self.entries
            .get(&(decr_file_name.to_string(), encr_file_name.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &SyncLogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
