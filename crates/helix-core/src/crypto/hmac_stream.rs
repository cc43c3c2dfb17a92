//! Authenticated chunk framing.
//!
//! The ciphertext after the preamble is cut into records of
//! `tag (32) | payload (up to CHUNK_PAYLOAD_SIZE)`. Each tag is
//!
//! ```text
//! HMAC-SHA256(hmac_key, header_mac | chunk_index (u64 BE) | final_flag (u8) | payload)
//! ```
//!
//! Every chunk except the last carries a full payload. The final flag makes
//! dropping trailing chunks detectable; the index makes reordering detectable.

use std::io::{self, Read, Write};

use ring::hmac;

use super::CryptoError;
use super::bytes::ct_eq;
use super::header::MAC_SIZE;

pub const CHUNK_PAYLOAD_SIZE: usize = 64 * 1024;
const RECORD_SIZE: usize = MAC_SIZE + CHUNK_PAYLOAD_SIZE;

fn chunk_tag(key: &hmac::Key, header_mac: &[u8; MAC_SIZE], index: u64, is_final: bool, payload: &[u8]) -> hmac::Tag {
    let mut ctx = hmac::Context::with_key(key);
    ctx.update(header_mac);
    ctx.update(&index.to_be_bytes());
    ctx.update(&[u8::from(is_final)]);
    ctx.update(payload);
    ctx.sign()
}

/// Writes authenticated chunks to the wrapped writer.
///
/// [`HmacChunkWriter::finish`] must be called to emit the final chunk.
pub struct HmacChunkWriter<W: Write> {
    inner: W,
    key: hmac::Key,
    header_mac: [u8; MAC_SIZE],
    buffer: Vec<u8>,
    index: u64,
}

impl<W: Write> HmacChunkWriter<W> {
    pub fn new(inner: W, hmac_key: &[u8], header_mac: [u8; MAC_SIZE]) -> Self {
        HmacChunkWriter {
            inner,
            key: hmac::Key::new(hmac::HMAC_SHA256, hmac_key),
            header_mac,
            buffer: Vec::with_capacity(CHUNK_PAYLOAD_SIZE + 1),
            index: 0,
        }
    }

    fn emit(&mut self, len: usize, is_final: bool) -> io::Result<()> {
        let tag = chunk_tag(&self.key, &self.header_mac, self.index, is_final, &self.buffer[..len]);
        self.inner.write_all(tag.as_ref())?;
        self.inner.write_all(&self.buffer[..len])?;
        self.buffer.drain(..len);
        self.index += 1;
        Ok(())
    }

    /// Emit the final chunk (possibly empty) and return the wrapped writer.
    pub fn finish(mut self) -> io::Result<W> {
        let len = self.buffer.len();
        self.emit(len, true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HmacChunkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        // A full chunk is only known to be non-final once more data follows it.
        while self.buffer.len() > CHUNK_PAYLOAD_SIZE {
            self.emit(CHUNK_PAYLOAD_SIZE, false)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Verifies and strips chunk framing from the wrapped reader.
///
/// Chunks are verified before any of their bytes are returned.
pub struct HmacChunkReader<R: Read> {
    inner: R,
    key: hmac::Key,
    header_mac: [u8; MAC_SIZE],
    index: u64,
    current: Vec<u8>,
    pos: usize,
    lookahead: Vec<u8>,
    finished: bool,
}

impl<R: Read> HmacChunkReader<R> {
    pub fn new(inner: R, hmac_key: &[u8], header_mac: [u8; MAC_SIZE]) -> Self {
        HmacChunkReader {
            inner,
            key: hmac::Key::new(hmac::HMAC_SHA256, hmac_key),
            header_mac,
            index: 0,
            current: Vec::new(),
            pos: 0,
            lookahead: Vec::new(),
            finished: false,
        }
    }

    fn fill(&mut self, buf: &mut Vec<u8>, want: usize) -> io::Result<()> {
        let missing = want.saturating_sub(buf.len()) as u64;
        (&mut self.inner).take(missing).read_to_end(buf)?;
        Ok(())
    }

    fn load_chunk(&mut self) -> io::Result<()> {
        let mut record = std::mem::take(&mut self.lookahead);
        record.reserve(RECORD_SIZE);
        self.fill(&mut record, RECORD_SIZE)?;
        if record.len() < MAC_SIZE {
            return Err(CryptoError::Truncated {
                reason: format!("chunk {} is missing its authentication tag", self.index),
            }
            .into_io());
        }

        let is_final = if record.len() < RECORD_SIZE {
            true
        } else {
            let mut next = Vec::with_capacity(1);
            self.fill(&mut next, 1)?;
            let at_end = next.is_empty();
            self.lookahead = next;
            at_end
        };

        let (tag, payload) = record.split_at(MAC_SIZE);
        let expected = chunk_tag(&self.key, &self.header_mac, self.index, is_final, payload);
        if !ct_eq(expected.as_ref(), tag) {
            return Err(CryptoError::ChunkAuthentication { chunk: self.index }.into_io());
        }

        record.drain(..MAC_SIZE);
        self.current = record;
        self.pos = 0;
        self.index += 1;
        self.finished = is_final;
        Ok(())
    }
}

impl<R: Read> Read for HmacChunkReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            if self.finished {
                return Ok(0);
            }
            self.load_chunk()?;
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];
    const HEADER_MAC: [u8; 32] = [0x17; 32];

    fn frame(data: &[u8]) -> Vec<u8> {
        let mut writer = HmacChunkWriter::new(Vec::new(), &KEY, HEADER_MAC);
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn unframe(framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut reader = HmacChunkReader::new(framed, &KEY, HEADER_MAC);
        let mut out = Vec::new();
        match reader.read_to_end(&mut out) {
            Ok(_) => Ok(out),
            Err(e) => Err(CryptoError::from_io(e).unwrap()),
        }
    }

    #[test]
    fn test_empty_stream_has_one_final_chunk() {
        let framed = frame(b"");
        assert_eq!(framed.len(), MAC_SIZE);
        assert!(unframe(&framed).unwrap().is_empty());
    }

    #[test]
    fn test_exact_chunk_boundary() {
        let data = vec![9u8; CHUNK_PAYLOAD_SIZE];
        let framed = frame(&data);
        // exactly one full final chunk, no trailing empty chunk
        assert_eq!(framed.len(), RECORD_SIZE);
        assert_eq!(unframe(&framed).unwrap(), data);
    }

    #[test]
    fn test_multi_chunk_roundtrip() {
        let data: Vec<u8> = (0..CHUNK_PAYLOAD_SIZE * 2 + 100).map(|i| (i % 251) as u8).collect();
        let framed = frame(&data);
        assert_eq!(framed.len(), data.len() + 3 * MAC_SIZE);
        assert_eq!(unframe(&framed).unwrap(), data);
    }

    #[test]
    fn test_dropped_final_chunk_detected() {
        let data = vec![1u8; CHUNK_PAYLOAD_SIZE + 10];
        let framed = frame(&data);
        let truncated = &framed[..RECORD_SIZE];
        assert!(matches!(
            unframe(truncated),
            Err(CryptoError::ChunkAuthentication { chunk: 0 })
        ));
    }

    #[test]
    fn test_flipped_payload_detected() {
        let mut framed = frame(b"hello world");
        let last = framed.len() - 1;
        framed[last] ^= 0x80;
        assert!(matches!(unframe(&framed), Err(CryptoError::ChunkAuthentication { .. })));
    }

    #[test]
    fn test_swapped_chunks_detected() {
        let data: Vec<u8> = (0..CHUNK_PAYLOAD_SIZE * 3).map(|i| (i / CHUNK_PAYLOAD_SIZE) as u8).collect();
        let framed = frame(&data);
        let mut swapped = Vec::new();
        swapped.extend_from_slice(&framed[RECORD_SIZE..2 * RECORD_SIZE]);
        swapped.extend_from_slice(&framed[..RECORD_SIZE]);
        swapped.extend_from_slice(&framed[2 * RECORD_SIZE..]);
        assert!(matches!(
            unframe(&swapped),
            Err(CryptoError::ChunkAuthentication { chunk: 0 })
        ));
    }

    #[test]
    fn test_missing_tag_is_truncation() {
        assert!(matches!(unframe(&[0u8; 5]), Err(CryptoError::Truncated { .. })));
    }

    #[test]
    fn test_wrong_header_mac_rejected() {
        let framed = frame(b"bound to a header");
        let mut reader = HmacChunkReader::new(&framed[..], &KEY, [0u8; 32]);
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            CryptoError::from_io(err),
            Ok(CryptoError::ChunkAuthentication { .. })
        ));
    }
}
