//! File-level building blocks: entries, the encrypted envelope, block framing,
//! crash cleanup and the in-memory directory tree.

pub mod cleanup;
pub mod entry;
pub mod file;
pub mod framing;
pub mod tree;

pub use entry::{EntryType, FileEntry};
pub use file::{DecryptedFile, FileContext, FileDecryptionError, FileEncryptionError, FileError};
pub use tree::{FsEntry, FsEntryKind, FsTree, SimulatedMetadata, TreeOptions};
