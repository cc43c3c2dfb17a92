//! Property tests for the encrypted file codec.

mod common;

use std::io::{Read, Write};

use helix_core::FileVersion;
use helix_core::crypto::CryptoError;
use helix_core::crypto::header::HEADER_SIZE;
use helix_core::crypto::stream::{DecryptReader, EncryptWriter};
use proptest::prelude::*;

fn encrypt(content: &[u8]) -> Vec<u8> {
    let provider = common::provider();
    let derived = provider.for_encryption(FileVersion::UnitTest).unwrap();
    let mut writer = EncryptWriter::new(Vec::new(), &derived).unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap()
}

fn decrypt(encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let provider = common::provider();
    let mut reader = DecryptReader::open(encrypted, &provider)?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).map_err(|e| CryptoError::from_io(e).unwrap())?;
    reader.finish().map_err(|e| CryptoError::from_io(e).unwrap())?;
    Ok(out)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_stream_roundtrip(content in prop::collection::vec(any::<u8>(), 0..200_000)) {
        let encrypted = encrypt(&content);
        prop_assert_eq!(decrypt(&encrypted).unwrap(), content);
    }

    #[test]
    fn test_any_flipped_bit_is_detected(
        content in prop::collection::vec(any::<u8>(), 0..150_000),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut encrypted = encrypt(&content);
        let i = position.index(encrypted.len());
        encrypted[i] ^= 1 << bit;
        let err = decrypt(&encrypted).unwrap_err();
        prop_assert!(
            err.is_integrity_violation() || matches!(err, CryptoError::HeaderAuthentication),
            "unexpected error {err:?}"
        );
        if i >= HEADER_SIZE {
            prop_assert!(err.is_integrity_violation(), "unexpected error {err:?}");
        }
    }

    #[test]
    fn test_truncation_is_detected(
        content in prop::collection::vec(any::<u8>(), 1..150_000),
        cut in any::<prop::sample::Index>(),
    ) {
        let encrypted = encrypt(&content);
        let keep = cut.index(encrypted.len());
        prop_assert!(decrypt(&encrypted[..keep]).is_err());
    }
}

#[test]
fn test_identical_content_encrypts_differently() {
    let a = encrypt(b"same content");
    let b = encrypt(b"same content");
    assert_ne!(a, b);
    assert_eq!(decrypt(&a).unwrap(), decrypt(&b).unwrap());
}

#[test]
fn test_wrong_password_fails_header() {
    let encrypted = encrypt(b"content");
    let other = common::provider_for("another password");
    let err = DecryptReader::open(&encrypted[..], &other).err().unwrap();
    assert!(matches!(err, CryptoError::HeaderAuthentication));
}
