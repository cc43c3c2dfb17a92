//! The fixed-size preamble at the start of every encrypted file.
//!
//! ```text
//! designator (8) | password salt (32) | hmac salt (16) | iv (16) | header mac (32)
//! ```
//!
//! The header MAC authenticates everything before it and also seeds every chunk
//! MAC, binding the chunk stream to this preamble.

use std::io::{self, Read};

use rand::RngCore;
use ring::hmac;
use zeroize::Zeroizing;

use super::CryptoError;
use super::bytes::{concat, ct_eq};
use super::keys::{DESIGNATOR_SIZE, DerivedBytes, FileVersion, KEY_SIZE, PASSWORD_SALT_SIZE};

pub const HMAC_SALT_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
pub const MAC_SIZE: usize = 32;
pub const HEADER_SIZE: usize = DESIGNATOR_SIZE + PASSWORD_SALT_SIZE + HMAC_SALT_SIZE + IV_SIZE + MAC_SIZE;

/// Parsed preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: FileVersion,
    pub password_salt: [u8; PASSWORD_SALT_SIZE],
    pub hmac_salt: [u8; HMAC_SALT_SIZE],
    pub iv: [u8; IV_SIZE],
    pub header_mac: [u8; MAC_SIZE],
}

/// Per-file keys recovered from a verified header.
pub struct StreamKeys {
    pub aes_key: Zeroizing<[u8; KEY_SIZE]>,
    pub hmac_key: Zeroizing<[u8; KEY_SIZE]>,
    pub iv: [u8; IV_SIZE],
    pub header_mac: [u8; MAC_SIZE],
}

fn derive_hmac_key(derived: &DerivedBytes, hmac_salt: &[u8; HMAC_SALT_SIZE]) -> Zeroizing<[u8; KEY_SIZE]> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, derived.key());
    let tag = hmac::sign(&key, hmac_salt);
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(tag.as_ref());
    out
}

impl FileHeader {
    /// Create a header with fresh HMAC salt and IV for `derived`.
    pub fn generate(derived: &DerivedBytes) -> (Self, StreamKeys) {
        let mut rng = rand::rng();
        let mut hmac_salt = [0u8; HMAC_SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut hmac_salt);
        rng.fill_bytes(&mut iv);

        let hmac_key = derive_hmac_key(derived, &hmac_salt);
        let mut header = FileHeader {
            version: derived.version(),
            password_salt: *derived.salt(),
            hmac_salt,
            iv,
            header_mac: [0u8; MAC_SIZE],
        };
        header.header_mac = header.compute_mac(&hmac_key);

        let keys = StreamKeys {
            aes_key: Zeroizing::new(*derived.key()),
            hmac_key,
            iv,
            header_mac: header.header_mac,
        };
        (header, keys)
    }

    fn authenticated_bytes(&self) -> Vec<u8> {
        concat(&[
            &self.version.designator(),
            &self.password_salt,
            &self.hmac_salt,
            &self.iv,
        ])
    }

    fn compute_mac(&self, hmac_key: &[u8; KEY_SIZE]) -> [u8; MAC_SIZE] {
        let key = hmac::Key::new(hmac::HMAC_SHA256, hmac_key);
        let tag = hmac::sign(&key, &self.authenticated_bytes());
        let mut out = [0u8; MAC_SIZE];
        out.copy_from_slice(tag.as_ref());
        out
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let body = self.authenticated_bytes();
        out[..body.len()].copy_from_slice(&body);
        out[body.len()..].copy_from_slice(&self.header_mac);
        out
    }

    /// Read and parse a preamble. Does not authenticate it.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CryptoError> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CryptoError::Truncated {
                reason: format!("file shorter than the {HEADER_SIZE}-byte header"),
            },
            _ => CryptoError::Truncated { reason: e.to_string() },
        })?;

        let (designator, rest) = buf.split_at(DESIGNATOR_SIZE);
        let version = FileVersion::from_designator(designator).ok_or_else(|| designator_error(designator))?;
        let (password_salt, rest) = rest.split_at(PASSWORD_SALT_SIZE);
        let (hmac_salt, rest) = rest.split_at(HMAC_SALT_SIZE);
        let (iv, header_mac) = rest.split_at(IV_SIZE);

        let mut header = FileHeader {
            version,
            password_salt: [0u8; PASSWORD_SALT_SIZE],
            hmac_salt: [0u8; HMAC_SALT_SIZE],
            iv: [0u8; IV_SIZE],
            header_mac: [0u8; MAC_SIZE],
        };
        header.password_salt.copy_from_slice(password_salt);
        header.hmac_salt.copy_from_slice(hmac_salt);
        header.iv.copy_from_slice(iv);
        header.header_mac.copy_from_slice(header_mac);
        Ok(header)
    }

    /// Authenticate the preamble under `derived` and return the stream keys.
    pub fn verify(&self, derived: &DerivedBytes) -> Result<StreamKeys, CryptoError> {
        let hmac_key = derive_hmac_key(derived, &self.hmac_salt);
        let expected = self.compute_mac(&hmac_key);
        if !ct_eq(&expected, &self.header_mac) {
            return Err(CryptoError::HeaderAuthentication);
        }
        Ok(StreamKeys {
            aes_key: Zeroizing::new(*derived.key()),
            hmac_key,
            iv: self.iv,
            header_mac: self.header_mac,
        })
    }
}

/// A designator one byte away from a known one is a damaged file, not a foreign one.
fn designator_error(designator: &[u8]) -> CryptoError {
    let designator_hex = hex::encode(designator);
    let damaged = FileVersion::ALL.iter().any(|version| {
        let known = version.designator();
        known.iter().zip(designator).filter(|(a, b)| a != b).count() == 1
    });
    if damaged {
        CryptoError::CorruptDesignator { designator: designator_hex }
    } else {
        CryptoError::UnknownDesignator { designator: designator_hex }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::hash_secret;

    fn derived(password: &[u8]) -> DerivedBytes {
        DerivedBytes::derive(&hash_secret(password), [3u8; PASSWORD_SALT_SIZE], FileVersion::UnitTest)
    }

    #[test]
    fn test_header_layout() {
        let (header, _) = FileHeader::generate(&derived(b"pw"));
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 104);
        assert_eq!(&bytes[..8], &FileVersion::UnitTest.designator());
        assert_eq!(&bytes[8..40], &[3u8; 32]);
    }

    #[test]
    fn test_parse_and_verify() {
        let key = derived(b"pw");
        let (header, keys) = FileHeader::generate(&key);
        let parsed = FileHeader::read_from(&mut &header.to_bytes()[..]).unwrap();
        assert_eq!(parsed, header);
        let verified = parsed.verify(&key).unwrap();
        assert_eq!(*verified.hmac_key, *keys.hmac_key);
        assert_eq!(verified.iv, keys.iv);
    }

    #[test]
    fn test_wrong_password_fails_header() {
        let (header, _) = FileHeader::generate(&derived(b"pw"));
        assert!(matches!(
            header.verify(&derived(b"other")),
            Err(CryptoError::HeaderAuthentication)
        ));
    }

    #[test]
    fn test_tampered_iv_fails_header() {
        let key = derived(b"pw");
        let (header, _) = FileHeader::generate(&key);
        let mut bytes = header.to_bytes();
        bytes[60] ^= 0x01;
        let parsed = FileHeader::read_from(&mut &bytes[..]).unwrap();
        assert!(matches!(parsed.verify(&key), Err(CryptoError::HeaderAuthentication)));
    }

    #[test]
    fn test_unknown_designator() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..8].copy_from_slice(b"NOTHELIX");
        assert!(matches!(
            FileHeader::read_from(&mut &bytes[..]),
            Err(CryptoError::UnknownDesignator { .. })
        ));
    }

    #[test]
    fn test_damaged_designator_is_corruption() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..8].copy_from_slice(&FileVersion::V1.designator());
        bytes[7] ^= 0x04;
        let err = FileHeader::read_from(&mut &bytes[..]).err().unwrap();
        assert!(matches!(err, CryptoError::CorruptDesignator { .. }), "{err:?}");
        assert!(err.is_integrity_violation());

        bytes[..8].copy_from_slice(&FileVersion::UnitTest.designator());
        bytes[0] ^= 0x80;
        let err = FileHeader::read_from(&mut &bytes[..]).err().unwrap();
        assert!(matches!(err, CryptoError::CorruptDesignator { .. }), "{err:?}");
    }

    #[test]
    fn test_short_header_is_truncated() {
        let bytes = FileVersion::UnitTest.designator();
        assert!(matches!(
            FileHeader::read_from(&mut &bytes[..]),
            Err(CryptoError::Truncated { .. })
        ));
    }
}
