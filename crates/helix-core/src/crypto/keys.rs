//! Key derivation from a password and key files.
//!
//! Every secret is hashed and the hashes are combined into one master secret,
//! which PBKDF2 stretches under a per-file salt. [`DerivedBytesProvider`]
//! caches the stretched keys by salt.

use std::collections::HashMap;
use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rand::RngCore;
use ring::{digest, pbkdf2};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use super::bytes::{concat, ct_compare};

/// Size of derived keys and secret checksums.
pub const KEY_SIZE: usize = 32;
/// Size of the per-file password salt.
pub const PASSWORD_SALT_SIZE: usize = 32;
/// Size of the leading format designator.
pub const DESIGNATOR_SIZE: usize = 8;

const DERIVED_CACHE_CAPACITY: usize = 64;

/// Error type for key access operations.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// Neither a password nor any key file was supplied.
    #[error("No password or key file supplied")]
    NoSecrets,

    /// A key file could not be read.
    #[error("Failed to read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Lock was poisoned (a thread panicked while holding it)
    #[error("Key lock was poisoned")]
    LockPoisoned,
}

/// On-disk format versions.
///
/// A version fixes the leading designator and the PBKDF2 cost. Readers pick the
/// version from the designator; writers use whichever version the directory was
/// created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileVersion {
    V1,
    /// Low-cost derivation for test suites. Never use for real data.
    UnitTest,
}

impl FileVersion {
    pub const ALL: [FileVersion; 2] = [FileVersion::V1, FileVersion::UnitTest];

    pub fn designator(self) -> [u8; DESIGNATOR_SIZE] {
        match self {
            FileVersion::V1 => *b"HXSYNC\x00\x01",
            FileVersion::UnitTest => *b"HXSYNC\xFF\xFF",
        }
    }

    pub fn from_designator(designator: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|version| version.designator().as_slice() == designator)
    }

    pub fn pbkdf2_iterations(self) -> NonZeroU32 {
        let iterations = match self {
            FileVersion::V1 => 100_000,
            FileVersion::UnitTest => 10,
        };
        NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileVersion::V1 => write!(f, "v1"),
            FileVersion::UnitTest => write!(f, "unit-test"),
        }
    }
}

/// SHA-256 checksum of a single secret input.
pub fn hash_secret(input: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let digest = digest::digest(&digest::SHA256, input);
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(digest.as_ref());
    out
}

/// Combine secret checksums into the single master secret.
///
/// One checksum is used as-is. Several are sorted with a constant-time
/// comparator and the concatenation is hashed, so the result does not depend on
/// the order in which the password and key files were supplied.
pub fn combine_secrets(
    mut checksums: Vec<Zeroizing<[u8; KEY_SIZE]>>,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyAccessError> {
    match checksums.len() {
        0 => Err(KeyAccessError::NoSecrets),
        1 => Ok(checksums.remove(0)),
        _ => {
            checksums.sort_by(|a, b| ct_compare(&**a, &**b));
            let parts: Vec<&[u8]> = checksums.iter().map(|c| c.as_slice()).collect();
            let joined = Zeroizing::new(concat(&parts));
            Ok(hash_secret(&joined))
        }
    }
}

/// A key derived from the master secret with one salt under one version.
pub struct DerivedBytes {
    key: Zeroizing<[u8; KEY_SIZE]>,
    salt: [u8; PASSWORD_SALT_SIZE],
    version: FileVersion,
}

impl DerivedBytes {
    /// Run PBKDF2-HMAC-SHA256 over the master secret.
    pub fn derive(secret: &[u8; KEY_SIZE], salt: [u8; PASSWORD_SALT_SIZE], version: FileVersion) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            version.pbkdf2_iterations(),
            &salt,
            secret,
            key.as_mut_slice(),
        );
        DerivedBytes { key, salt, version }
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn salt(&self) -> &[u8; PASSWORD_SALT_SIZE] {
        &self.salt
    }

    pub fn version(&self) -> FileVersion {
        self.version
    }
}

impl fmt::Debug for DerivedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedBytes")
            .field("key", &"[REDACTED]")
            .field("salt", &hex::encode(self.salt))
            .field("version", &self.version)
            .finish()
    }
}

struct ProviderState {
    by_salt: LruCache<([u8; PASSWORD_SALT_SIZE], FileVersion), Arc<DerivedBytes>>,
    current: HashMap<FileVersion, Arc<DerivedBytes>>,
}

/// Hands out derived keys, caching the expensive PBKDF2 runs.
///
/// Encryption reuses one random salt per version for the provider's lifetime, so a
/// sync pass pays the derivation cost once. Decryption looks keys up by the salt
/// stored in each file.
///
/// # Thread Safety
///
/// The provider is `Send + Sync` and is shared as `Arc<DerivedBytesProvider>`.
pub struct DerivedBytesProvider {
    secret: Zeroizing<[u8; KEY_SIZE]>,
    state: Mutex<ProviderState>,
}

impl DerivedBytesProvider {
    pub fn from_secret(secret: Zeroizing<[u8; KEY_SIZE]>) -> Self {
        let capacity = NonZeroUsize::new(DERIVED_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        DerivedBytesProvider {
            secret,
            state: Mutex::new(ProviderState {
                by_salt: LruCache::new(capacity),
                current: HashMap::new(),
            }),
        }
    }

    pub fn from_password(password: &SecretString) -> Self {
        Self::from_secret(hash_secret(password.expose_secret().as_bytes()))
    }

    /// Build from any combination of a password and key files.
    pub fn from_secrets(
        password: Option<&SecretString>,
        key_files: &[impl AsRef<Path>],
    ) -> Result<Self, KeyAccessError> {
        let mut checksums = Vec::with_capacity(key_files.len() + 1);
        if let Some(password) = password {
            checksums.push(hash_secret(password.expose_secret().as_bytes()));
        }
        for path in key_files {
            let path = path.as_ref();
            let contents = Zeroizing::new(std::fs::read(path).map_err(|source| {
                KeyAccessError::KeyFile { path: path.to_path_buf(), source }
            })?);
            trace!(path = %path.display(), "Hashed key file");
            checksums.push(hash_secret(&contents));
        }
        Ok(Self::from_secret(combine_secrets(checksums)?))
    }

    /// Key for writing a new file under `version`.
    pub fn for_encryption(&self, version: FileVersion) -> Result<Arc<DerivedBytes>, KeyAccessError> {
        let mut state = self.state.lock().map_err(|_| KeyAccessError::LockPoisoned)?;
        if let Some(existing) = state.current.get(&version) {
            return Ok(Arc::clone(existing));
        }

        let mut salt = [0u8; PASSWORD_SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);
        debug!(%version, "Deriving encryption key");
        let derived = Arc::new(DerivedBytes::derive(&self.secret, salt, version));
        state.by_salt.put((salt, version), Arc::clone(&derived));
        state.current.insert(version, Arc::clone(&derived));
        Ok(derived)
    }

    /// Key for reading a file that was written with `salt` under `version`.
    pub fn for_decryption(
        &self,
        salt: [u8; PASSWORD_SALT_SIZE],
        version: FileVersion,
    ) -> Result<Arc<DerivedBytes>, KeyAccessError> {
        {
            let mut state = self.state.lock().map_err(|_| KeyAccessError::LockPoisoned)?;
            if let Some(hit) = state.by_salt.get(&(salt, version)) {
                return Ok(Arc::clone(hit));
            }
        }

        // Derive without holding the lock; a racing thread at worst repeats the work.
        debug!(%version, "Deriving decryption key");
        let derived = Arc::new(DerivedBytes::derive(&self.secret, salt, version));
        let mut state = self.state.lock().map_err(|_| KeyAccessError::LockPoisoned)?;
        state.by_salt.put((salt, version), Arc::clone(&derived));
        Ok(derived)
    }
}

impl fmt::Debug for DerivedBytesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedBytesProvider")
            .field("secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(password: &str) -> DerivedBytesProvider {
        DerivedBytesProvider::from_password(&SecretString::from(password.to_string()))
    }

    #[test]
    fn test_designator_lookup() {
        for version in FileVersion::ALL {
            assert_eq!(FileVersion::from_designator(&version.designator()), Some(version));
        }
        assert_eq!(FileVersion::from_designator(b"NOTHELIX"), None);
        assert_eq!(FileVersion::from_designator(b"HXSYNC"), None);
    }

    #[test]
    fn test_unit_test_version_is_cheap() {
        assert!(FileVersion::UnitTest.pbkdf2_iterations() < FileVersion::V1.pbkdf2_iterations());
    }

    #[test]
    fn test_combine_secrets_is_order_independent() {
        let a = hash_secret(b"password");
        let b = hash_secret(b"key file contents");
        let ab = combine_secrets(vec![a.clone(), b.clone()]).unwrap();
        let ba = combine_secrets(vec![b, a]).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_combine_single_secret_is_identity() {
        let a = hash_secret(b"only");
        assert_eq!(*combine_secrets(vec![a.clone()]).unwrap(), *a);
    }

    #[test]
    fn test_combine_requires_a_secret() {
        assert!(matches!(combine_secrets(Vec::new()), Err(KeyAccessError::NoSecrets)));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let secret = hash_secret(b"pw");
        let salt = [7u8; PASSWORD_SALT_SIZE];
        let a = DerivedBytes::derive(&secret, salt, FileVersion::UnitTest);
        let b = DerivedBytes::derive(&secret, salt, FileVersion::UnitTest);
        assert_eq!(a.key(), b.key());

        let other_salt = DerivedBytes::derive(&secret, [8u8; PASSWORD_SALT_SIZE], FileVersion::UnitTest);
        assert_ne!(a.key(), other_salt.key());
    }

    #[test]
    fn test_encryption_salt_reused_per_version() {
        let provider = provider("pw");
        let first = provider.for_encryption(FileVersion::UnitTest).unwrap();
        let second = provider.for_encryption(FileVersion::UnitTest).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_decryption_finds_encryption_key() {
        let provider = provider("pw");
        let enc = provider.for_encryption(FileVersion::UnitTest).unwrap();
        let dec = provider.for_decryption(*enc.salt(), FileVersion::UnitTest).unwrap();
        assert_eq!(enc.key(), dec.key());
    }

    #[test]
    fn test_different_passwords_differ() {
        let a = provider("one").for_decryption([1; 32], FileVersion::UnitTest).unwrap();
        let b = provider("two").for_decryption([1; 32], FileVersion::UnitTest).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_file_combination() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("key.bin");
        std::fs::write(&key_file, b"some key material").unwrap();
        let pw = SecretString::from("pw".to_string());

        let combined = DerivedBytesProvider::from_secrets(Some(&pw), &[&key_file]).unwrap();
        let password_only = DerivedBytesProvider::from_secrets(Some(&pw), &[] as &[&Path]).unwrap();
        let a = combined.for_decryption([0; 32], FileVersion::UnitTest).unwrap();
        let b = password_only.for_decryption([0; 32], FileVersion::UnitTest).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_missing_key_file_reported() {
        let err = DerivedBytesProvider::from_secrets(None, &[Path::new("/nonexistent/helix.key")]).unwrap_err();
        assert!(matches!(err, KeyAccessError::KeyFile { .. }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let derived = DerivedBytes::derive(&hash_secret(b"pw"), [0; 32], FileVersion::UnitTest);
        let shown = format!("{derived:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains(&hex::encode(derived.key())));
    }
}
