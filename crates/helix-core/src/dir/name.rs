//! Deterministic mapping from logical names to encrypted file names.

use ring::hmac;
use unicode_normalization::UnicodeNormalization;

use crate::fs::file::ENCRYPTED_EXTENSION;

/// Hex characters kept from the name MAC (128 bits).
pub const NAME_HEX_LEN: usize = 32;

/// Derives `hex(HMAC-SHA256(file_name_key, NFC(name)))[..32] + ".hx"`.
///
/// The mapping is case-sensitive: names differing only in case get distinct
/// encrypted files, which is what lets a case-only rename be expressed as a
/// remove plus an add.
pub struct FileNameEncoder {
    key: hmac::Key,
}

impl FileNameEncoder {
    pub fn new(file_name_key: &[u8]) -> Self {
        FileNameEncoder {
            key: hmac::Key::new(hmac::HMAC_SHA256, file_name_key),
        }
    }

    pub fn encode_name(&self, decr_name: &str) -> String {
        let normalized: String = decr_name.nfc().collect();
        let tag = hmac::sign(&self.key, normalized.as_bytes());
        let mut name = hex::encode(&tag.as_ref()[..NAME_HEX_LEN / 2]);
        name.push_str(ENCRYPTED_EXTENSION);
        name
    }

    /// Whether `name` has the shape of an encoded name.
    pub fn is_encoded_name(name: &str) -> bool {
        name.strip_suffix(ENCRYPTED_EXTENSION).is_some_and(|stem| {
            stem.len() == NAME_HEX_LEN && stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape() {
        let encoder = FileNameEncoder::new(&[1u8; 32]);
        let name = encoder.encode_name("docs/report.pdf");
        assert_eq!(name.len(), NAME_HEX_LEN + 3);
        assert!(FileNameEncoder::is_encoded_name(&name));
    }

    #[test]
    fn test_deterministic_and_keyed() {
        let a = FileNameEncoder::new(&[1u8; 32]);
        let b = FileNameEncoder::new(&[2u8; 32]);
        assert_eq!(a.encode_name("x"), a.encode_name("x"));
        assert_ne!(a.encode_name("x"), b.encode_name("x"));
    }

    #[test]
    fn test_case_sensitive() {
        let encoder = FileNameEncoder::new(&[1u8; 32]);
        assert_ne!(encoder.encode_name("File.txt"), encoder.encode_name("file.txt"));
    }

    #[test]
    fn test_nfc_and_nfd_agree() {
        let encoder = FileNameEncoder::new(&[1u8; 32]);
        let composed = "caf\u{e9}";
        let decomposed = "cafe\u{301}";
        assert_eq!(encoder.encode_name(composed), encoder.encode_name(decomposed));
    }

    #[test]
    fn test_is_encoded_name() {
        assert!(!FileNameEncoder::is_encoded_name("helix.hx"));
        assert!(!FileNameEncoder::is_encoded_name("0123456789abcdef0123456789abcdef.txt"));
        assert!(!FileNameEncoder::is_encoded_name("0123456789ABCDEF0123456789ABCDEF.hx"));
        assert!(FileNameEncoder::is_encoded_name("0123456789abcdef0123456789abcdef.hx"));
    }
}
