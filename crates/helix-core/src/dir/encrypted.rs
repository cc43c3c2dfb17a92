use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::DirectoryError;
use super::header::{DirectoryHeader, HEADER_FILE_NAME};
use super::name::FileNameEncoder;
use crate::crypto::keys::{DerivedBytesProvider, FileVersion};
use crate::fs::entry::FileEntry;
use crate::fs::file::{self, FileError};
use crate::fs::tree::{FsEntry, FsTree, TreeOptions};

const MAX_DIRECTORY_HEADER: u64 = 4 * 1024;

/// The encrypted side: a flat directory of `.hx` files plus `helix.hx`.
pub struct EncryptedDirectory {
    tree: FsTree,
    header: DirectoryHeader,
    encoder: FileNameEncoder,
    provider: Arc<DerivedBytesProvider>,
    version: FileVersion,
}

fn encrypted_tree(root: &Path, options: TreeOptions) -> FsTree {
    FsTree::new(root, options).with_filter(Box::new(|rel: &str| {
        rel.contains('/') || !FileNameEncoder::is_encoded_name(rel)
    }))
}

impl EncryptedDirectory {
    pub fn is_initialized(root: &Path) -> bool {
        root.join(HEADER_FILE_NAME).is_file()
    }

    /// Open an existing encrypted directory by decrypting its header.
    ///
    /// New files are written with the format version the header was written with.
    #[instrument(level = "debug", skip(provider, options))]
    pub fn open(
        root: &Path,
        provider: Arc<DerivedBytesProvider>,
        options: TreeOptions,
    ) -> Result<Self, DirectoryError> {
        let header_path = root.join(HEADER_FILE_NAME);
        if !header_path.is_file() {
            return Err(DirectoryError::NotInitialized { path: root.to_path_buf() });
        }
        let decrypted = file::decrypt_to_memory(&header_path, &provider, MAX_DIRECTORY_HEADER)?;
        let header: DirectoryHeader =
            serde_json::from_slice(&decrypted.content).map_err(|e| DirectoryError::InvalidHeader {
                path: header_path.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self::assemble(root, header, provider, decrypted.version, options))
    }

    /// Create `helix.hx` with a fresh key and id.
    ///
    /// In what-if mode nothing is written and the directory exists only in memory.
    #[instrument(level = "debug", skip(provider, options))]
    pub fn initialize(
        root: &Path,
        provider: Arc<DerivedBytesProvider>,
        version: FileVersion,
        options: TreeOptions,
    ) -> Result<Self, DirectoryError> {
        let header_path = root.join(HEADER_FILE_NAME);
        if header_path.exists() {
            return Err(DirectoryError::AlreadyInitialized { path: root.to_path_buf() });
        }

        let header = DirectoryHeader::generate();
        if !options.what_if {
            std::fs::create_dir_all(root).map_err(|source| DirectoryError::Io {
                source,
                path: root.to_path_buf(),
            })?;
            let json = serde_json::to_vec(&header).map_err(|e| DirectoryError::InvalidHeader {
                path: header_path.clone(),
                reason: e.to_string(),
            })?;
            let entry = FileEntry::file(HEADER_FILE_NAME, Utc::now(), json.len() as u64);
            file::encrypt_entry(&entry, &json[..], &header_path, &provider, version)?;
        }
        info!(root = %root.display(), directory_id = %header.directory_id(), "Initialized encrypted directory");

        Ok(Self::assemble(root, header, provider, version, options))
    }

    fn assemble(
        root: &Path,
        header: DirectoryHeader,
        provider: Arc<DerivedBytesProvider>,
        version: FileVersion,
        options: TreeOptions,
    ) -> Self {
        EncryptedDirectory {
            tree: encrypted_tree(root, options),
            encoder: FileNameEncoder::new(header.file_name_key()),
            header,
            provider,
            version,
        }
    }

    pub fn root(&self) -> &Path {
        self.tree.root_path()
    }

    pub fn directory_id(&self) -> Uuid {
        self.header.directory_id()
    }

    pub fn version(&self) -> FileVersion {
        self.version
    }

    pub fn provider(&self) -> &Arc<DerivedBytesProvider> {
        &self.provider
    }

    pub fn encoder(&self) -> &FileNameEncoder {
        &self.encoder
    }

    pub fn tree(&mut self) -> &mut FsTree {
        &mut self.tree
    }

    pub fn encode_name(&self, decr_name: &str) -> String {
        self.encoder.encode_name(decr_name)
    }

    pub fn encr_path(&self, encr_name: &str) -> PathBuf {
        self.tree.full_path(encr_name)
    }

    /// Decrypt the header block of one encrypted file.
    pub fn read_header(&self, encr_name: &str) -> Result<FileEntry, FileError> {
        file::decrypt_header(&self.encr_path(encr_name), &self.provider)
    }

    /// Every encrypted entry file, excluding the directory header.
    pub fn entries(&mut self) -> io::Result<Vec<FsEntry>> {
        Ok(self.tree.entries()?.into_iter().filter(FsEntry::is_file).collect())
    }
}
