//! External-change sentinel.
//!
//! The sentinel is the MD5 of the first [`FILE_BLOCK_HASH_SIZE`] bytes
//! of the on-disk file as last observed by this process, plus the
//! ignore latch. It is advisory, not cryptographic integrity: it
//! catches the mainstream case of another process having rewritten the
//! file between open and save.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{DatabaseError, DatabaseResult};
use crate::stream::FILE_BLOCK_HASH_SIZE;

/// Outcome of comparing the sentinel against the on-disk file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentinelVerdict {
    /// The file matches the last observed state, or is too short to
    /// carry a full block.
    Clean,
    /// The first block differs: the file was externally modified.
    Mismatch,
}

/// File-block digest policy state.
#[derive(Debug, Default)]
pub struct FileBlockSentinel {
    digest: Option<[u8; 16]>,
    ignore_until_saved: bool,
}

impl FileBlockSentinel {
    /// Creates an empty sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed digest, if any.
    #[must_use]
    pub fn digest(&self) -> Option<[u8; 16]> {
        self.digest
    }

    /// Installs a digest observed from a hashing sink or the bytes of
    /// an opened file. `None` records that the file was too short.
    pub fn set_digest(&mut self, digest: Option<[u8; 16]>) {
        self.digest = digest;
    }

    /// Whether no digest is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digest.is_none()
    }

    /// Whether the next same-path save skips the external-change check.
    #[must_use]
    pub fn ignore_until_saved(&self) -> bool {
        self.ignore_until_saved
    }

    /// Sets the ignore latch. It auto-clears on the next successful
    /// save.
    pub fn set_ignore_until_saved(&mut self, ignore: bool) {
        self.ignore_until_saved = ignore;
    }

    /// Resets digest and latch.
    pub fn clear(&mut self) {
        self.digest = None;
        self.ignore_until_saved = false;
    }

    /// Re-reads the first block of `path` and compares it against the
    /// held digest. A missing file or one shorter than the block is
    /// reported clean; the save will simply rewrite it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, and
    /// [`DatabaseError::BlockReadError`] if the read comes up short
    /// even though the file is large enough.
    pub fn check_disk(&self, path: &Path) -> DatabaseResult<SentinelVerdict> {
        let Some(expected) = self.digest else {
            return Ok(SentinelVerdict::Clean);
        };
        if !path.exists() {
            return Ok(SentinelVerdict::Clean);
        }

        let mut file = File::open(path).map_err(|e| {
            DatabaseError::io(format!("opening file {}", path.display()), e)
        })?;

        let mut block = Vec::with_capacity(FILE_BLOCK_HASH_SIZE);
        let read = (&mut file)
            .take(FILE_BLOCK_HASH_SIZE as u64)
            .read_to_end(&mut block)
            .map_err(|e| DatabaseError::io(format!("reading file {}", path.display()), e))?;

        if read == FILE_BLOCK_HASH_SIZE {
            if md5::compute(&block).0 == expected {
                Ok(SentinelVerdict::Clean)
            } else {
                Ok(SentinelVerdict::Mismatch)
            }
        } else {
            let file_len = file
                .metadata()
                .map_err(|e| DatabaseError::io(format!("reading file {}", path.display()), e))?
                .len();
            if file_len >= FILE_BLOCK_HASH_SIZE as u64 {
                Err(DatabaseError::BlockReadError)
            } else {
                Ok(SentinelVerdict::Clean)
            }
        }
    }
}
