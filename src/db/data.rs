//! The database state bag.

use std::path::PathBuf;
use std::sync::Arc;

use crate::format::FILE_VERSION_MAX;
use crate::key::{CompositeKey, KdfParams, KeyMaterial};
use crate::types::{CipherId, CompressionAlgorithm, PublicCustomData, CIPHER_AES256};

/// Pure state of one database: the file binding, container
/// parameters, and key material. Owned by [`Database`](super::Database)
/// and populated by the codec on open.
pub struct DatabaseData {
    /// Original, possibly unresolved path as presented by the caller.
    /// `None` until bound.
    pub file_path: Option<PathBuf>,
    /// Container format version (major | minor).
    pub format_version: u32,
    /// Bulk cipher tag.
    pub cipher: CipherId,
    /// Payload compression.
    pub compression_algorithm: CompressionAlgorithm,
    /// Public custom data, persisted in the plaintext header.
    pub public_custom_data: PublicCustomData,
    /// Per-save master seed; freshly generated by the codec on write.
    pub master_seed: KeyMaterial,
    /// KDF descriptor including the transform seed.
    pub kdf: KdfParams,
    /// Composite key, absent after a header-only open.
    pub key: Option<Arc<CompositeKey>>,
    /// Cached output of `key.transform(kdf)`.
    pub transformed_key: KeyMaterial,
    /// Last challenge-response result, empty when no token is present.
    pub challenge_response_key: KeyMaterial,
    /// Message of the last key failure, for UI display.
    pub key_error: Option<String>,
}

impl DatabaseData {
    /// Fresh state: newest format version, AES-256, Gzip, Argon2id
    /// with a random seed, no key.
    ///
    /// # Panics
    ///
    /// Panics if the system RNG is unavailable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            file_path: None,
            format_version: FILE_VERSION_MAX,
            cipher: CIPHER_AES256,
            compression_algorithm: CompressionAlgorithm::Gzip,
            public_custom_data: PublicCustomData::new(),
            master_seed: KeyMaterial::empty(),
            kdf: KdfParams::argon2id_default().expect("system RNG is available"),
            key: None,
            transformed_key: KeyMaterial::empty(),
            challenge_response_key: KeyMaterial::empty(),
            key_error: None,
        }
    }

    /// Zeroes all key-derived state.
    pub fn reset_keys(&mut self) {
        self.key = None;
        self.transformed_key = KeyMaterial::empty();
        self.challenge_response_key = KeyMaterial::empty();
    }

    /// Resets everything back to the fresh state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for DatabaseData {
    fn default() -> Self {
        Self::new()
    }
}
