//! The full transform: gzip, then AES-256-CBC, then authenticated chunks.
//!
//! ```text
//! plaintext -> gzip -> aes-256-cbc/pkcs7 -> hmac chunks -> file (after preamble)
//! ```

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::trace;

use super::CryptoError;
use super::cbc_stream::{CbcDecryptReader, CbcEncryptWriter};
use super::header::FileHeader;
use super::hmac_stream::{HmacChunkReader, HmacChunkWriter};
use super::keys::{DerivedBytes, DerivedBytesProvider, FileVersion};

/// Encrypting writer. Writes the preamble on construction.
pub struct EncryptWriter<W: Write> {
    inner: GzEncoder<CbcEncryptWriter<HmacChunkWriter<W>>>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(mut output: W, derived: &DerivedBytes) -> io::Result<Self> {
        let (header, keys) = FileHeader::generate(derived);
        output.write_all(&header.to_bytes())?;

        let chunks = HmacChunkWriter::new(output, keys.hmac_key.as_slice(), keys.header_mac);
        let cipher = CbcEncryptWriter::new(chunks, &keys.aes_key, &keys.iv);
        Ok(EncryptWriter {
            inner: GzEncoder::new(cipher, Compression::default()),
        })
    }

    /// Flush every layer and return the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        let cipher = self.inner.finish()?;
        let chunks = cipher.finish()?;
        chunks.finish()
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader over a complete encrypted file.
///
/// Integrity failures surface from `read` as `io::ErrorKind::InvalidData`
/// carrying a [`CryptoError`]; recover it with [`CryptoError::from_io`].
pub struct DecryptReader<R: Read> {
    inner: GzDecoder<CbcDecryptReader<HmacChunkReader<R>>>,
    version: FileVersion,
}

impl<R: Read> DecryptReader<R> {
    /// Parse and authenticate the preamble, then set up the stream.
    pub fn open(mut input: R, provider: &DerivedBytesProvider) -> Result<Self, CryptoError> {
        let header = FileHeader::read_from(&mut input)?;
        let derived = provider.for_decryption(header.password_salt, header.version)?;
        let keys = header.verify(&derived)?;
        trace!(version = %header.version, "Header authenticated");

        let chunks = HmacChunkReader::new(input, keys.hmac_key.as_slice(), keys.header_mac);
        let cipher = CbcDecryptReader::new(chunks, &keys.aes_key, &keys.iv);
        Ok(DecryptReader {
            inner: GzDecoder::new(cipher),
            version: header.version,
        })
    }

    pub fn version(&self) -> FileVersion {
        self.version
    }

    /// Drain and authenticate whatever the decompressor did not need.
    ///
    /// The compressed stream can end before the final cipher block and chunk have
    /// been verified. Call this before trusting a fully read stream.
    pub fn finish(self) -> io::Result<()> {
        let mut rest = self.inner.into_inner();
        let trailing = io::copy(&mut rest, &mut io::sink())?;
        if trailing > 0 {
            trace!(trailing, "Ignored bytes after compressed stream");
        }
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use super::*;
    use crate::crypto::hmac_stream::CHUNK_PAYLOAD_SIZE;

    fn provider(password: &str) -> DerivedBytesProvider {
        DerivedBytesProvider::from_password(&SecretString::from(password.to_string()))
    }

    fn encrypt(provider: &DerivedBytesProvider, data: &[u8]) -> Vec<u8> {
        let derived: Arc<DerivedBytes> = provider.for_encryption(FileVersion::UnitTest).unwrap();
        let mut writer = EncryptWriter::new(Vec::new(), &derived).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn decrypt(provider: &DerivedBytesProvider, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut reader = DecryptReader::open(data, provider)?;
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .and_then(|_| reader.finish())
            .map_err(|e| CryptoError::from_io(e).unwrap_or(CryptoError::Truncated { reason: "io".into() }))?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip() {
        let provider = provider("pw");
        let data = b"hello helix".repeat(1000);
        let encrypted = encrypt(&provider, &data);
        assert_eq!(decrypt(&provider, &encrypted).unwrap(), data);
    }

    #[test]
    fn test_compresses_repetitive_data() {
        let provider = provider("pw");
        let data = vec![b'a'; CHUNK_PAYLOAD_SIZE * 4];
        let encrypted = encrypt(&provider, &data);
        assert!(encrypted.len() < data.len() / 10);
    }

    #[test]
    fn test_wrong_password() {
        let encrypted = encrypt(&provider("right"), b"secret");
        assert!(matches!(
            decrypt(&provider("wrong"), &encrypted),
            Err(CryptoError::HeaderAuthentication)
        ));
    }

    #[test]
    fn test_tampered_body() {
        let provider = provider("pw");
        let mut encrypted = encrypt(&provider, b"some content worth protecting");
        let idx = encrypted.len() - 5;
        encrypted[idx] ^= 0x01;
        assert!(matches!(
            decrypt(&provider, &encrypted),
            Err(CryptoError::ChunkAuthentication { .. })
        ));
    }

    #[test]
    fn test_version_reported() {
        let provider = provider("pw");
        let encrypted = encrypt(&provider, b"x");
        let reader = DecryptReader::open(&encrypted[..], &provider).unwrap();
        assert_eq!(reader.version(), FileVersion::UnitTest);
    }
}
