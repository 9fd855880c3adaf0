//! Key-derivation descriptors.
//!
//! The KDF descriptor carries both the cost parameters and the seed
//! (salt) under which the composite key is transformed. The seed is
//! randomized on every save so that two saves of the same database
//! never share a transformed key.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KeyError;
use crate::format::{FILE_VERSION_3_1, FILE_VERSION_4};

use super::KeyMaterial;

/// Seed length in bytes, shared by both KDFs.
pub const KDF_SEED_SIZE: usize = 32;

/// Default Argon2id memory cost in KiB.
pub const DEFAULT_ARGON2_MEMORY_KIB: u32 = 19_456;
/// Default Argon2id iteration count.
pub const DEFAULT_ARGON2_ITERATIONS: u32 = 2;
/// Default Argon2id lane count.
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 1;
/// Default AES-KDF round count.
pub const DEFAULT_AES_KDF_ROUNDS: u64 = 100_000;

/// Parameters and seed for one key-derivation function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfParams {
    /// Argon2id. Requires container format version 4.
    Argon2id {
        /// Memory cost in KiB.
        memory_kib: u32,
        /// Iteration count.
        iterations: u32,
        /// Lane count.
        parallelism: u32,
        /// Transform seed (salt).
        seed: Vec<u8>,
    },
    /// Seeded SHA-256 round chain, the portable legacy KDF. Works with
    /// container format version 3.1.
    AesKdf {
        /// Round count.
        rounds: u64,
        /// Transform seed.
        seed: Vec<u8>,
    },
}

impl KdfParams {
    /// Argon2id with default cost parameters and a fresh random seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    pub fn argon2id_default() -> Result<Self, KeyError> {
        Ok(Self::Argon2id {
            memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            iterations: DEFAULT_ARGON2_ITERATIONS,
            parallelism: DEFAULT_ARGON2_PARALLELISM,
            seed: KeyMaterial::random(KDF_SEED_SIZE)?.as_bytes().to_vec(),
        })
    }

    /// Legacy KDF with default rounds and a fresh random seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    pub fn aes_kdf_default() -> Result<Self, KeyError> {
        Ok(Self::AesKdf {
            rounds: DEFAULT_AES_KDF_ROUNDS,
            seed: KeyMaterial::random(KDF_SEED_SIZE)?.as_bytes().to_vec(),
        })
    }

    /// Returns the current transform seed.
    #[must_use]
    pub fn seed(&self) -> &[u8] {
        match self {
            Self::Argon2id { seed, .. } | Self::AesKdf { seed, .. } => seed,
        }
    }

    /// Replaces the transform seed with fresh random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    pub fn randomize_seed(&mut self) -> Result<(), KeyError> {
        let fresh = KeyMaterial::random(KDF_SEED_SIZE)?.as_bytes().to_vec();
        match self {
            Self::Argon2id { seed, .. } | Self::AesKdf { seed, .. } => *seed = fresh,
        }
        Ok(())
    }

    /// The lowest container format version able to persist this KDF.
    #[must_use]
    pub const fn min_format_version(&self) -> u32 {
        match self {
            Self::Argon2id { .. } => FILE_VERSION_4,
            Self::AesKdf { .. } => FILE_VERSION_3_1,
        }
    }

    /// Transforms `raw` under this descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the KDF parameters are rejected or the
    /// derivation fails.
    pub fn transform(&self, raw: &KeyMaterial) -> Result<KeyMaterial, KeyError> {
        match self {
            Self::Argon2id {
                memory_kib,
                iterations,
                parallelism,
                seed,
            } => {
                let params = Params::new(*memory_kib, *iterations, *parallelism, Some(32))
                    .map_err(|e| KeyError::Transform(format!("invalid Argon2 parameters: {e}")))?;
                let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

                let mut out = [0u8; 32];
                argon2
                    .hash_password_into(raw.as_bytes(), seed, &mut out)
                    .map_err(|e| KeyError::Transform(format!("Argon2 failed: {e}")))?;
                Ok(KeyMaterial::from_bytes(out.to_vec()))
            }
            Self::AesKdf { rounds, seed } => {
                let mut state = Sha256::digest(raw.as_bytes());
                for _ in 0..*rounds {
                    let mut hasher = Sha256::new();
                    hasher.update(seed);
                    hasher.update(state);
                    state = hasher.finalize();
                }
                Ok(KeyMaterial::from_bytes(
                    Sha256::digest(state).to_vec(),
                ))
            }
        }
    }
}
