//! Length-prefixed blocks inside the decrypted stream.
//!
//! ```text
//! len0 (u64 BE) | block0 | len1 (u64 BE) | block1 | ...
//! ```
//!
//! Block 0 is the JSON [`FileEntry`](super::entry::FileEntry); block 1 is the
//! file content.

use std::io::{self, Read, Write};

pub struct BlockWriter<W: Write> {
    inner: W,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W) -> Self {
        BlockWriter { inner }
    }

    pub fn write_block(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(&(data.len() as u64).to_be_bytes())?;
        self.inner.write_all(data)
    }

    /// Write a block of exactly `len` bytes copied from `source`.
    ///
    /// Fails if `source` ends early, e.g. because the file shrank while being read.
    pub fn write_block_from<R: Read>(&mut self, len: u64, source: R) -> io::Result<()> {
        self.inner.write_all(&len.to_be_bytes())?;
        let copied = io::copy(&mut source.take(len), &mut self.inner)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {copied} of {len} bytes"),
            ));
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct BlockReader<R: Read> {
    inner: R,
    remaining: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        BlockReader { inner, remaining: 0 }
    }

    /// Advance to the next block, skipping any unread part of the current one.
    pub fn next_block(&mut self) -> io::Result<BlockStream<'_, R>> {
        if self.remaining > 0 {
            let skipped = io::copy(&mut (&mut self.inner).take(self.remaining), &mut io::sink())?;
            if skipped != self.remaining {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "block truncated"));
            }
        }
        let mut len = [0u8; 8];
        self.inner.read_exact(&mut len)?;
        let len = u64::from_be_bytes(len);
        self.remaining = len;
        Ok(BlockStream { reader: self, len })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Bounded view of one block.
pub struct BlockStream<'a, R: Read> {
    reader: &'a mut BlockReader<R>,
    len: u64,
}

impl<R: Read> BlockStream<'_, R> {
    /// Declared length of the block.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole block, refusing blocks larger than `limit`.
    pub fn read_all(mut self, limit: u64) -> io::Result<Vec<u8>> {
        if self.len > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("block of {} bytes exceeds limit of {limit}", self.len),
            ));
        }
        let mut out = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl<R: Read> Read for BlockStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.reader.remaining;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.reader.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "block truncated"));
        }
        self.reader.remaining -= n as u64;
        Ok(n)
    }
}
