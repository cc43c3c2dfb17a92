//! The two sides of a directory pair.

pub mod decrypted;
pub mod encrypted;
pub mod header;
pub mod name;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fs::file::FileError;

pub use decrypted::DecryptedDirectory;
pub use encrypted::EncryptedDirectory;
pub use header::{DirectoryHeader, HEADER_FILE_NAME};
pub use name::FileNameEncoder;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("{} is not an initialized encrypted directory", .path.display())]
    NotInitialized { path: PathBuf },

    #[error("{} already contains a directory header", .path.display())]
    AlreadyInitialized { path: PathBuf },

    #[error("Invalid directory header in {}: {reason}", .path.display())]
    InvalidHeader { path: PathBuf, reason: String },

    #[error("Directory header error: {0}")]
    File(#[from] FileError),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}
