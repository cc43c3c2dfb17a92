//! Error types for the helix-core crate
//!
//! Re-exports every error type and its context structure so callers can
//! match on failures without knowing which module raised them.

pub use crate::crypto::{CryptoError, KeyAccessError};
pub use crate::dir::DirectoryError;
pub use crate::fs::entry::InvalidFileName;
pub use crate::fs::file::{FileContext, FileDecryptionError, FileEncryptionError, FileError};
pub use crate::sync::{SyncError, SyncLogError};
