#![forbid(unsafe_code)]

pub mod crypto;
pub mod dir;
pub mod error;
pub mod fs;
pub mod sync;

pub use crypto::keys::{DerivedBytesProvider, FileVersion};
pub use fs::entry::{EntryType, FileEntry};
pub use sync::{DirectoryPair, PairOptions, PreSyncDetails, SyncMode, SyncOperation, SyncResult};
