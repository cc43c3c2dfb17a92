//! Encrypted file envelope: preamble plus an authenticated, encrypted stream of
//! two blocks (header entry and content).
//!
//! Writes go to a staging file next to the destination and are committed with a
//! rename, so a reader never observes a partially written file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use std::{fmt, io::ErrorKind};

use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use super::entry::{EntryType, FileEntry};
use super::framing::{BlockReader, BlockWriter};
use crate::crypto::CryptoError;
use crate::crypto::keys::{DerivedBytesProvider, FileVersion, KeyAccessError};
use crate::crypto::stream::{DecryptReader, EncryptWriter};

pub const ENCRYPTED_EXTENSION: &str = ".hx";
pub const STAGING_SUFFIX: &str = ".~hx-st";
pub const BACKUP_SUFFIX: &str = ".~hx-bk";

/// Upper bound for the JSON header block.
const MAX_HEADER_BLOCK: u64 = 64 * 1024;

/// Context for file operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    /// The logical file name (if known)
    pub file_name: Option<String>,
    /// The path being read or written
    pub path: Option<PathBuf>,
}

impl FileContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref name) = self.file_name {
            parts.push(format!("file '{name}'"));
        }
        if let Some(ref path) = self.path {
            parts.push(format!("at {:?}", path.display()));
        }
        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File decryption error: {0}")]
    Decryption(#[from] FileDecryptionError),
    #[error("File encryption error: {0}")]
    Encryption(#[from] FileEncryptionError),
    #[error("IO error on {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },
}

impl FileError {
    #[must_use]
    pub fn io_with_context(source: io::Error, context: FileContext) -> Self {
        FileError::Io { source, context }
    }

    /// Whether the error means the stored data cannot be trusted.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, FileError::Decryption(e) if e.is_integrity_violation())
    }

    /// Whether the error is most likely a wrong password or key file.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, FileError::Decryption(FileDecryptionError::Password { .. }))
    }
}

#[derive(Error, Debug)]
pub enum FileDecryptionError {
    /// The preamble MAC did not verify.
    ///
    /// **[USER ERROR]** Almost always a wrong password or key file.
    #[error("Wrong password or key file for {context}")]
    Password { context: FileContext },

    /// The file does not start with a known designator.
    #[error("Unrecognized file format {designator} for {context}")]
    Format { designator: String, context: FileContext },

    /// Authenticated data failed verification or the decrypted structure is invalid.
    ///
    /// **[INTEGRITY VIOLATION]**
    #[error("[INTEGRITY VIOLATION] Corrupted file {context}: {reason}")]
    Corruption { reason: String, context: FileContext },

    #[error("IO error reading {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl FileDecryptionError {
    /// Whether the stored data failed authentication or is structurally invalid.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, FileDecryptionError::Corruption { .. })
    }

    fn from_crypto(err: CryptoError, context: &FileContext) -> Self {
        match err {
            CryptoError::HeaderAuthentication => FileDecryptionError::Password {
                context: context.clone(),
            },
            CryptoError::UnknownDesignator { designator } => FileDecryptionError::Format {
                designator,
                context: context.clone(),
            },
            CryptoError::KeyAccess(e) => FileDecryptionError::KeyAccess(e),
            other => {
                warn!(error = %other, %context, "Integrity check failed");
                FileDecryptionError::Corruption {
                    reason: other.to_string(),
                    context: context.clone(),
                }
            }
        }
    }

    /// Classify an error surfacing from the decrypting stream.
    fn from_stream(err: io::Error, context: &FileContext) -> Self {
        match CryptoError::from_io(err) {
            Ok(crypto) => Self::from_crypto(crypto, context),
            Err(io) if matches!(io.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) => {
                FileDecryptionError::Corruption {
                    reason: io.to_string(),
                    context: context.clone(),
                }
            }
            Err(source) => FileDecryptionError::Io {
                source,
                context: context.clone(),
            },
        }
    }

    fn corruption(reason: impl Into<String>, context: &FileContext) -> Self {
        FileDecryptionError::Corruption {
            reason: reason.into(),
            context: context.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FileEncryptionError {
    /// The entry cannot be stored, e.g. because its name is invalid.
    #[error("Invalid entry {context}: {reason}")]
    InvalidEntry { reason: String, context: FileContext },

    #[error("IO error writing {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// A fully decrypted small file held in memory.
#[derive(Debug)]
pub struct DecryptedFile {
    pub entry: FileEntry,
    pub version: FileVersion,
    pub content: Vec<u8>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub fn staged_path(path: &Path) -> PathBuf {
    with_suffix(path, STAGING_SUFFIX)
}

pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, BACKUP_SUFFIX)
}

/// Whether a name belongs to an interrupted write.
pub fn is_temporary_name(name: &str) -> bool {
    name.ends_with(STAGING_SUFFIX) || name.ends_with(BACKUP_SUFFIX)
}

/// Atomically replace `live` with `staged`.
///
/// An existing `live` entry is first moved to a backup name and restored if the
/// final rename fails.
pub fn commit_staged(staged: &Path, live: &Path) -> io::Result<()> {
    let existing = match fs::symlink_metadata(live) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    let Some(existing) = existing else {
        return fs::rename(staged, live);
    };

    let backup = backup_path(live);
    match fs::remove_file(&backup) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(live, &backup)?;
    if let Err(e) = fs::rename(staged, live) {
        if let Err(restore) = fs::rename(&backup, live) {
            warn!(path = %live.display(), error = %restore, "Failed to restore backup");
        }
        return Err(e);
    }

    let cleanup = if existing.is_dir() {
        fs::remove_dir(&backup)
    } else {
        fs::remove_file(&backup)
    };
    if let Err(e) = cleanup {
        warn!(path = %backup.display(), error = %e, "Failed to remove backup");
    }
    Ok(())
}

fn discard(staged: &Path) {
    if let Err(e) = fs::remove_file(staged)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %staged.display(), error = %e, "Failed to remove staging file");
    }
}

/// Encrypt `entry` plus `content` into `encr_path`.
///
/// `content` must yield exactly `entry.length` bytes for files and is ignored
/// for other entry types.
#[instrument(level = "debug", skip(content, provider), fields(file = %entry.file_name))]
pub fn encrypt_entry<R: Read>(
    entry: &FileEntry,
    content: R,
    encr_path: &Path,
    provider: &DerivedBytesProvider,
    version: FileVersion,
) -> Result<(), FileError> {
    let context = FileContext::new()
        .with_file_name(&entry.file_name)
        .with_path(encr_path);

    entry.validate().map_err(|e| FileEncryptionError::InvalidEntry {
        reason: e.to_string(),
        context: context.clone(),
    })?;
    let header = serde_json::to_vec(entry).map_err(|e| FileEncryptionError::InvalidEntry {
        reason: e.to_string(),
        context: context.clone(),
    })?;
    let derived = provider.for_encryption(version).map_err(FileEncryptionError::from)?;
    let content_len = if entry.entry_type == EntryType::File { entry.length } else { 0 };

    let io_err = |source: io::Error| FileEncryptionError::Io {
        source,
        context: context.clone(),
    };
    if let Some(parent) = encr_path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let staged = staged_path(encr_path);
    let write = || -> io::Result<()> {
        let file = File::create(&staged)?;
        let mut writer = EncryptWriter::new(BufWriter::new(file), &derived)?;
        let mut blocks = BlockWriter::new(&mut writer);
        blocks.write_block(&header)?;
        blocks.write_block_from(content_len, content)?;
        let file = writer.finish()?.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    };
    if let Err(e) = write().and_then(|()| commit_staged(&staged, encr_path)) {
        discard(&staged);
        return Err(io_err(e).into());
    }

    trace!(length = content_len, "Encrypted entry");
    Ok(())
}

/// Encrypt whatever exists at `decr_path` under the logical name `file_name`.
///
/// Missing sources produce a tombstone.
pub fn encrypt_file(
    decr_path: &Path,
    file_name: &str,
    encr_path: &Path,
    provider: &DerivedBytesProvider,
    version: FileVersion,
) -> Result<FileEntry, FileError> {
    let context = || FileContext::new().with_file_name(file_name).with_path(decr_path);
    let entry = FileEntry::from_path(decr_path, file_name)
        .map_err(|e| FileError::io_with_context(e, context()))?;

    match entry.entry_type {
        EntryType::File => {
            let source = File::open(decr_path).map_err(|e| FileError::io_with_context(e, context()))?;
            encrypt_entry(&entry, BufReader::new(source), encr_path, provider, version)?;
        }
        _ => encrypt_entry(&entry, io::empty(), encr_path, provider, version)?,
    }
    Ok(entry)
}

fn open_stream(
    encr_path: &Path,
    provider: &DerivedBytesProvider,
    context: &FileContext,
) -> Result<DecryptReader<BufReader<File>>, FileDecryptionError> {
    let file = File::open(encr_path).map_err(|source| FileDecryptionError::Io {
        source,
        context: context.clone(),
    })?;
    DecryptReader::open(BufReader::new(file), provider)
        .map_err(|e| FileDecryptionError::from_crypto(e, context))
}

fn read_entry<R: Read>(
    blocks: &mut BlockReader<R>,
    context: &FileContext,
) -> Result<FileEntry, FileDecryptionError> {
    let raw = blocks
        .next_block()
        .and_then(|block| block.read_all(MAX_HEADER_BLOCK))
        .map_err(|e| FileDecryptionError::from_stream(e, context))?;
    let entry: FileEntry = serde_json::from_slice(&raw)
        .map_err(|e| FileDecryptionError::corruption(format!("invalid header block: {e}"), context))?;
    entry
        .validate()
        .map_err(|e| FileDecryptionError::corruption(format!("invalid file name in header: {e}"), context))?;
    Ok(entry)
}

/// Decrypt only the header block of an encrypted file.
///
/// Reads as little of the stream as needed; content is not verified.
#[instrument(level = "debug", skip(provider))]
pub fn decrypt_header(encr_path: &Path, provider: &DerivedBytesProvider) -> Result<FileEntry, FileError> {
    let context = FileContext::new().with_path(encr_path);
    let reader = open_stream(encr_path, provider, &context)?;
    let mut blocks = BlockReader::new(reader);
    Ok(read_entry(&mut blocks, &context)?)
}

/// Decrypt a small file completely into memory, verifying the whole stream.
pub fn decrypt_to_memory(
    encr_path: &Path,
    provider: &DerivedBytesProvider,
    content_limit: u64,
) -> Result<DecryptedFile, FileError> {
    let context = FileContext::new().with_path(encr_path);
    let reader = open_stream(encr_path, provider, &context)?;
    let version = reader.version();
    let mut blocks = BlockReader::new(reader);
    let entry = read_entry(&mut blocks, &context)?;
    let content = blocks
        .next_block()
        .and_then(|block| block.read_all(content_limit))
        .map_err(|e| FileDecryptionError::from_stream(e, &context))?;
    blocks
        .into_inner()
        .finish()
        .map_err(|e| FileDecryptionError::from_stream(e, &context))?;
    Ok(DecryptedFile { entry, version, content })
}

/// Skip the content block and authenticate the rest of the stream.
fn verify_remaining<R: Read>(
    mut blocks: BlockReader<DecryptReader<R>>,
    context: &FileContext,
) -> Result<(), FileDecryptionError> {
    blocks
        .next_block()
        .and_then(|mut block| io::copy(&mut block, &mut io::sink()))
        .map_err(|e| FileDecryptionError::from_stream(e, context))?;
    blocks
        .into_inner()
        .finish()
        .map_err(|e| FileDecryptionError::from_stream(e, context))
}

/// Decrypt `encr_path` and materialize its entry at `decr_path`.
///
/// Files are written to a staging name, fully authenticated, stamped with the
/// stored modification time and then renamed into place. Directories are
/// created; tombstones delete whatever exists at `decr_path`.
#[instrument(level = "debug", skip(provider))]
pub fn decrypt_file(
    encr_path: &Path,
    decr_path: &Path,
    provider: &DerivedBytesProvider,
) -> Result<FileEntry, FileError> {
    let mut context = FileContext::new().with_path(encr_path);
    let reader = open_stream(encr_path, provider, &context)?;
    let mut blocks = BlockReader::new(reader);
    let entry = read_entry(&mut blocks, &context)?;
    context = context.with_file_name(&entry.file_name);
    let out_err = |source: io::Error| {
        FileError::io_with_context(source, FileContext::new().with_file_name(&entry.file_name).with_path(decr_path))
    };

    match entry.entry_type {
        EntryType::File => {
            if let Some(parent) = decr_path.parent() {
                fs::create_dir_all(parent).map_err(out_err)?;
            }
            let staged = staged_path(decr_path);
            let result = write_content(blocks, &staged, &entry, &context)
                .and_then(|()| commit_staged(&staged, decr_path).map_err(out_err));
            if let Err(e) = result {
                discard(&staged);
                return Err(e);
            }
        }
        EntryType::Directory => {
            verify_remaining(blocks, &context)?;
            fs::create_dir_all(decr_path).map_err(out_err)?;
        }
        EntryType::Removed | EntryType::Purged => {
            verify_remaining(blocks, &context)?;
            match fs::symlink_metadata(decr_path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir(decr_path).map_err(out_err)?,
                Ok(_) => fs::remove_file(decr_path).map_err(out_err)?,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(out_err(e)),
            }
        }
    }

    debug!(file = %entry.file_name, entry_type = ?entry.entry_type, "Decrypted entry");
    Ok(entry)
}

fn write_content(
    mut blocks: BlockReader<DecryptReader<BufReader<File>>>,
    staged: &Path,
    entry: &FileEntry,
    context: &FileContext,
) -> Result<(), FileError> {
    let out_err = |source: io::Error| {
        FileError::io_with_context(source, FileContext::new().with_file_name(&entry.file_name).with_path(staged))
    };
    let mut out = BufWriter::new(File::create(staged).map_err(out_err)?);

    let copied = {
        let mut block = blocks
            .next_block()
            .map_err(|e| FileDecryptionError::from_stream(e, context))?;
        if block.len() != entry.length {
            return Err(FileDecryptionError::corruption(
                format!("content block is {} bytes, header says {}", block.len(), entry.length),
                context,
            )
            .into());
        }
        copy_plaintext(&mut block, &mut out, context)?
    };
    if copied != entry.length {
        return Err(FileDecryptionError::corruption("content shorter than declared", context).into());
    }
    blocks
        .into_inner()
        .finish()
        .map_err(|e| FileDecryptionError::from_stream(e, context))?;

    let file = out.into_inner().map_err(|e| out_err(e.into_error()))?;
    file.set_modified(SystemTime::from(entry.last_write_time_utc))
        .map_err(out_err)?;
    file.sync_all().map_err(out_err)?;
    Ok(())
}

/// Copy decrypted bytes, keeping stream failures apart from output failures.
fn copy_plaintext<R: Read, W: Write>(reader: &mut R, out: &mut W, context: &FileContext) -> Result<u64, FileError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FileDecryptionError::from_stream(e, context).into()),
        };
        out.write_all(&buf[..n])
            .map_err(|e| FileError::io_with_context(e, context.clone()))?;
        total += n as u64;
    }
    Ok(total)
}
