//! Write-through hashing sink.
//!
//! All write strategies route the container bytes through a
//! [`HashingSink`], which digests the first [`FILE_BLOCK_HASH_SIZE`]
//! bytes on their way to the underlying writer. After a successful
//! commit the digest becomes the file-block sentinel value, so the
//! sentinel reflects the exact bytes written rather than a re-read of
//! the disk.

use std::io::{self, Write};

/// Number of leading bytes covered by the file-block digest.
pub const FILE_BLOCK_HASH_SIZE: usize = 1024;

/// A writer adapter that hashes the first `limit` bytes passing
/// through it with MD5.
pub struct HashingSink<W: Write> {
    inner: W,
    ctx: md5::Context,
    hashed: usize,
    limit: usize,
}

impl<W: Write> HashingSink<W> {
    /// Wraps `inner`, hashing the first [`FILE_BLOCK_HASH_SIZE`] bytes.
    pub fn new(inner: W) -> Self {
        Self::with_limit(inner, FILE_BLOCK_HASH_SIZE)
    }

    /// Wraps `inner` with an explicit hash window.
    pub fn with_limit(inner: W, limit: usize) -> Self {
        Self {
            inner,
            ctx: md5::Context::new(),
            hashed: 0,
            limit,
        }
    }

    /// Total bytes hashed so far (saturates at the window size).
    #[must_use]
    pub fn hashed_len(&self) -> usize {
        self.hashed
    }

    /// Finalizes the sink, returning the wrapped writer and the
    /// digest. The digest is `None` unless the full hash window was
    /// streamed; a stream shorter than the window yields no digest,
    /// matching the sentinel's rule for short files.
    #[must_use]
    pub fn finish(self) -> (W, Option<[u8; 16]>) {
        let digest = (self.limit > 0 && self.hashed == self.limit).then(|| self.ctx.compute().0);
        (self.inner, digest)
    }
}

impl<W: Write> Write for HashingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if written > 0 && self.hashed < self.limit {
            let take = (self.limit - self.hashed).min(written);
            self.ctx.consume(&buf[..take]);
            self.hashed += take;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// MD5 of the first [`FILE_BLOCK_HASH_SIZE`] bytes of `bytes`, or
/// `None` when fewer are available.
#[must_use]
pub fn hash_first_block(bytes: &[u8]) -> Option<[u8; 16]> {
    (bytes.len() >= FILE_BLOCK_HASH_SIZE)
        .then(|| md5::compute(&bytes[..FILE_BLOCK_HASH_SIZE]).0)
}
