//! Cryptographic primitives for the helix file format

pub mod bytes;
pub mod cbc_stream;
pub mod header;
pub mod hmac_stream;
pub mod keys;
pub mod stream;

use std::io;

use thiserror::Error;

/// Errors produced while reading or writing the encrypted stream.
///
/// # Security Classification
///
/// Errors marked `[INTEGRITY VIOLATION]` mean that authenticated data did not
/// verify. Callers must discard anything produced from such a stream.
/// `HeaderAuthentication` is reported separately because it is by far most often
/// caused by a wrong password or key file rather than tampering.
#[derive(Error, Debug)]
pub enum CryptoError {
    // =========================================================================
    // USER ERRORS - Wrong secret or foreign file
    // =========================================================================
    /// The preamble MAC did not verify under the derived HMAC key.
    ///
    /// **[USER ERROR]** Wrong password or key file. A tampered preamble is
    /// cryptographically indistinguishable from a wrong secret.
    #[error("Header authentication failed - wrong password/key file or corrupted header")]
    HeaderAuthentication,

    /// The leading designator does not name any known file version.
    #[error("Unrecognized file format designator {designator}")]
    UnknownDesignator { designator: String },

    // =========================================================================
    // INTEGRITY VIOLATIONS - Potential adversarial tampering
    // =========================================================================
    /// A chunk MAC did not verify.
    ///
    /// **[INTEGRITY VIOLATION]** The chunk was modified, reordered, or the final
    /// chunk was removed.
    #[error("[INTEGRITY VIOLATION] Chunk {chunk} failed authentication - data corrupted or tampered")]
    ChunkAuthentication { chunk: u64 },

    /// The designator is one byte away from a known version.
    ///
    /// **[INTEGRITY VIOLATION]** A damaged helix file rather than a foreign one.
    #[error("[INTEGRITY VIOLATION] Damaged format designator {designator}")]
    CorruptDesignator { designator: String },

    /// The stream ended before a complete structure could be read.
    #[error("[INTEGRITY VIOLATION] Stream truncated: {reason}")]
    Truncated { reason: String },

    /// Cipher padding was malformed after an authenticated stream.
    #[error("[INTEGRITY VIOLATION] Invalid cipher padding")]
    InvalidPadding,

    // =========================================================================
    // SYSTEM ERRORS
    // =========================================================================
    /// Key material could not be accessed.
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl CryptoError {
    /// Whether the error indicates tampering or corruption of authenticated data.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            CryptoError::ChunkAuthentication { .. }
                | CryptoError::CorruptDesignator { .. }
                | CryptoError::Truncated { .. }
                | CryptoError::InvalidPadding
        )
    }

    /// Wrap in an `io::Error` so the error survives `Read`/`Write` adapters.
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }

    /// Recover a `CryptoError` previously wrapped with [`CryptoError::into_io`].
    ///
    /// Returns the original `io::Error` when it does not carry one.
    pub fn from_io(err: io::Error) -> Result<Self, io::Error> {
        if !err.get_ref().is_some_and(|inner| inner.is::<CryptoError>()) {
            return Err(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
            Some(Ok(crypto)) => Ok(*crypto),
            Some(Err(other)) => Err(io::Error::new(kind, other)),
            None => Err(io::Error::from(kind)),
        }
    }
}

pub use keys::{DerivedBytes, DerivedBytesProvider, FileVersion, KeyAccessError};
