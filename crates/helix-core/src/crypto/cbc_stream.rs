//! Streaming AES-256-CBC with PKCS#7 padding.

use std::io::{self, Read, Write};

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::CryptoError;
use super::header::IV_SIZE;
use super::keys::KEY_SIZE;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Encrypts everything written to it. [`CbcEncryptWriter::finish`] writes the
/// padded final block.
pub struct CbcEncryptWriter<W: Write> {
    inner: W,
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl<W: Write> CbcEncryptWriter<W> {
    pub fn new(inner: W, key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        CbcEncryptWriter {
            inner,
            cipher: Aes256CbcEnc::new(key.into(), iv.into()),
            pending: Vec::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub fn finish(mut self) -> io::Result<W> {
        let used = self.pending.len();
        let mut last = [0u8; BLOCK_SIZE];
        last[..used].copy_from_slice(&self.pending);
        let padded = self
            .cipher
            .encrypt_padded_mut::<Pkcs7>(&mut last, used)
            .map_err(|_| io::Error::other("padding buffer too small"))?;
        self.inner.write_all(padded)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CbcEncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        let whole = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        if whole > 0 {
            for block in self.pending[..whole].chunks_exact_mut(BLOCK_SIZE) {
                self.cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            self.inner.write_all(&self.pending[..whole])?;
            self.pending.drain(..whole);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypts the wrapped reader.
///
/// The last ciphertext block is held back until end of input so its padding can
/// be removed.
pub struct CbcDecryptReader<R: Read> {
    inner: R,
    cipher: Option<Aes256CbcDec>,
    ciphertext: Vec<u8>,
    plaintext: Vec<u8>,
    pos: usize,
}

impl<R: Read> CbcDecryptReader<R> {
    pub fn new(inner: R, key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        CbcDecryptReader {
            inner,
            cipher: Some(Aes256CbcDec::new(key.into(), iv.into())),
            ciphertext: Vec::with_capacity(READ_BUFFER_SIZE + BLOCK_SIZE),
            plaintext: Vec::new(),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self) -> io::Result<()> {
        let Some(cipher) = self.cipher.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let n = self.inner.read(&mut buf)?;
        self.plaintext.clear();
        self.pos = 0;

        if n == 0 {
            if self.ciphertext.len() != BLOCK_SIZE {
                let reason = match self.ciphertext.len() {
                    0 => "ciphertext is missing its final block".to_string(),
                    len => format!("ciphertext ends with {} stray bytes", len % BLOCK_SIZE),
                };
                return Err(CryptoError::Truncated { reason }.into_io());
            }
            let Some(cipher) = self.cipher.take() else {
                return Ok(());
            };
            let mut last = std::mem::take(&mut self.ciphertext);
            let unpadded = cipher
                .decrypt_padded_mut::<Pkcs7>(&mut last)
                .map_err(|_| CryptoError::InvalidPadding.into_io())?;
            self.plaintext.extend_from_slice(unpadded);
            return Ok(());
        }

        self.ciphertext.extend_from_slice(&buf[..n]);
        let blocks = self.ciphertext.len() / BLOCK_SIZE;
        if blocks > 1 {
            let release = (blocks - 1) * BLOCK_SIZE;
            for block in self.ciphertext[..release].chunks_exact_mut(BLOCK_SIZE) {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            self.plaintext.extend(self.ciphertext.drain(..release));
        }
        Ok(())
    }
}

impl<R: Read> Read for CbcDecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plaintext.len() {
            if self.cipher.is_none() {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = buf.len().min(self.plaintext.len() - self.pos);
        buf[..n].copy_from_slice(&self.plaintext[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
