//! Key material and composite keys.
//!
//! A database is unlocked by a [`CompositeKey`]: an ordered combination
//! of key factors (password, key file) plus optional challenge-response
//! factors backed by hardware tokens. The composite key reduces to a
//! single raw key, which the KDF transforms into the key the codec
//! derives per-save session material from.

pub mod kdf;

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KeyError;

pub use kdf::KdfParams;

// =============================================================================
// KeyMaterial
// =============================================================================

/// Raw or transformed key bytes.
///
/// The backing buffer is zeroized on drop and never printed by `Debug`.
/// Equality compares the raw bytes; an empty container compares equal
/// to [`KeyMaterial::empty`].
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Creates an empty container.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wraps existing bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Fills a container with `len` cryptographically random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    pub fn random(len: usize) -> Result<Self, KeyError> {
        let mut bytes = vec![0u8; len];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| KeyError::Transform(format!("random generator failed: {e}")))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether no bytes are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bytes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.0.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Key factors
// =============================================================================

/// A single non-interactive component of a composite key.
pub trait KeyFactor: Send + Sync {
    /// The factor's contribution to the composite raw key.
    fn raw_key(&self) -> &KeyMaterial;
}

/// A challenge-response component of a composite key, typically backed
/// by a hardware token. Presented with the per-save master seed, it
/// answers with a response mixed into the session key.
pub trait ChallengeResponseFactor: Send + Sync {
    /// Answers `seed` with the token's response.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is unavailable or rejects the
    /// exchange.
    fn challenge(&self, seed: &[u8]) -> Result<Vec<u8>, KeyError>;
}

/// Password factor: SHA-256 of the UTF-8 password.
pub struct PasswordFactor {
    key: KeyMaterial,
}

impl PasswordFactor {
    /// Creates a factor from a password string.
    #[must_use]
    pub fn new(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        Self {
            key: KeyMaterial::from_bytes(digest.to_vec()),
        }
    }
}

impl KeyFactor for PasswordFactor {
    fn raw_key(&self) -> &KeyMaterial {
        &self.key
    }
}

/// Key-file factor: SHA-256 of the file contents.
pub struct KeyFileFactor {
    key: KeyMaterial,
}

impl KeyFileFactor {
    /// Creates a factor from raw key-file contents.
    #[must_use]
    pub fn from_contents(contents: &[u8]) -> Self {
        let digest = Sha256::digest(contents);
        Self {
            key: KeyMaterial::from_bytes(digest.to_vec()),
        }
    }

    /// Loads a key file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let contents = fs::read(path.as_ref()).map_err(|e| {
            KeyError::Transform(format!(
                "unable to read key file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::from_contents(&contents))
    }
}

impl KeyFactor for KeyFileFactor {
    fn raw_key(&self) -> &KeyMaterial {
        &self.key
    }
}

// =============================================================================
// CompositeKey
// =============================================================================

/// Ordered combination of key factors unlocking one database.
#[derive(Default)]
pub struct CompositeKey {
    factors: Vec<Arc<dyn KeyFactor>>,
    challenge_factors: Vec<Arc<dyn ChallengeResponseFactor>>,
}

impl CompositeKey {
    /// Creates a composite key with no factors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for a password-only key.
    #[must_use]
    pub fn from_password(password: &str) -> Self {
        let mut key = Self::new();
        key.add_factor(Arc::new(PasswordFactor::new(password)));
        key
    }

    /// Appends a key factor. Order is significant: the raw key is a
    /// digest over factor contributions in insertion order.
    pub fn add_factor(&mut self, factor: Arc<dyn KeyFactor>) {
        self.factors.push(factor);
    }

    /// Appends a challenge-response factor.
    pub fn add_challenge_factor(&mut self, factor: Arc<dyn ChallengeResponseFactor>) {
        self.challenge_factors.push(factor);
    }

    /// Whether the key has no factors of either kind.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty() && self.challenge_factors.is_empty()
    }

    /// Reduces all non-interactive factors to a single raw key:
    /// SHA-256 over the concatenated factor contributions.
    #[must_use]
    pub fn raw_key(&self) -> KeyMaterial {
        let mut hasher = Sha256::new();
        for factor in &self.factors {
            hasher.update(factor.raw_key().as_bytes());
        }
        KeyMaterial::from_bytes(hasher.finalize().to_vec())
    }

    /// Transforms the raw key under `kdf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the KDF fails.
    pub fn transform(&self, kdf: &KdfParams) -> Result<KeyMaterial, KeyError> {
        kdf.transform(&self.raw_key())
    }

    /// Presents `seed` to every challenge-response factor and
    /// concatenates their responses. An empty result means no
    /// challenge factors are present.
    ///
    /// # Errors
    ///
    /// Returns an error if any factor fails the exchange.
    pub fn challenge(&self, seed: &[u8]) -> Result<Vec<u8>, KeyError> {
        let mut response = Vec::new();
        for factor in &self.challenge_factors {
            response.extend_from_slice(&factor.challenge(seed)?);
        }
        Ok(response)
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeKey")
            .field("factors", &self.factors.len())
            .field("challenge_factors", &self.challenge_factors.len())
            .finish()
    }
}
