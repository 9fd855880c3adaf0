//! Core type definitions shared across the database layers.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Stable 128-bit identifier of a live database, assigned at
/// construction and used for cross-component references through the
/// process-wide registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseId(Uuid);

impl DatabaseId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseId({})", self.0)
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Cipher identifiers
// =============================================================================

/// Opaque 128-bit tag identifying the bulk cipher of a container.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CipherId(pub [u8; 16]);

/// AES-256 in GCM mode.
pub const CIPHER_AES256: CipherId = CipherId([
    0x31, 0xc1, 0xf2, 0xe6, 0xbf, 0x71, 0x43, 0x50, 0xbe, 0x58, 0x05, 0x21, 0x6a, 0xfc, 0x5a,
    0xff,
]);

/// XChaCha20-Poly1305.
pub const CIPHER_CHACHA20: CipherId = CipherId([
    0xd6, 0x03, 0x8a, 0x2b, 0x8b, 0x6f, 0x4c, 0xb5, 0xa5, 0x24, 0x33, 0x9a, 0x31, 0xdb, 0xb5,
    0x9a,
]);

impl CipherId {
    /// Returns the raw tag bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this tag names a cipher the codec can instantiate.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        *self == CIPHER_AES256 || *self == CIPHER_CHACHA20
    }
}

impl fmt::Debug for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherId({})", hex::encode(self.0))
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Payload compression applied before encryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum CompressionAlgorithm {
    /// No compression.
    None = 0,
    /// Gzip (DEFLATE) compression.
    Gzip = 1,
}

/// Highest value a compression tag may take in a valid container.
pub const COMPRESSION_ALGORITHM_MAX: u32 = CompressionAlgorithm::Gzip as u32;

impl CompressionAlgorithm {
    /// Returns the wire value of this algorithm.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for CompressionAlgorithm {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            other => Err(other),
        }
    }
}

// =============================================================================
// Public custom data
// =============================================================================

/// Random padding, rewritten on each save to defeat byte-identical
/// deduplication side channels on cloud-sync storage.
pub const KEY_RANDOM_SLUG: &str = "KPXC_RANDOM_SLUG";
/// Pre-unlock database UUID (format version >= 4 only).
pub const KEY_PUBLIC_UUID: &str = "KPXC_PUBLIC_UUID";
/// Pre-unlock display name.
pub const KEY_PUBLIC_NAME: &str = "KPXC_PUBLIC_NAME";
/// Pre-unlock display color.
pub const KEY_PUBLIC_COLOR: &str = "KPXC_PUBLIC_COLOR";
/// Pre-unlock icon index.
pub const KEY_PUBLIC_ICON: &str = "KPXC_PUBLIC_ICON";

/// A typed value stored in the public (unencrypted) custom data of a
/// container header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomDataValue {
    /// UTF-8 string value.
    String(String),
    /// Signed integer value.
    Integer(i64),
    /// Raw byte value.
    Bytes(Vec<u8>),
}

/// Ordered mapping from string keys to typed values, persisted in the
/// container header outside the encrypted payload. Survives
/// re-encryption and key changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicCustomData(BTreeMap<String, CustomDataValue>);

impl PublicCustomData {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CustomDataValue> {
        self.0.get(key)
    }

    /// Returns the string stored under `key`, if it is a string.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(CustomDataValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer stored under `key`, if it is an integer.
    #[must_use]
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(CustomDataValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Returns the bytes stored under `key`, if it is a byte value.
    #[must_use]
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key) {
            Some(CustomDataValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: CustomDataValue) {
        self.0.insert(key.into(), value);
    }

    /// Removes the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<CustomDataValue> {
        self.0.remove(key)
    }

    /// Whether a value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CustomDataValue)> {
        self.0.iter()
    }
}

// =============================================================================
// Deleted objects
// =============================================================================

/// Tombstone for a group or entry removed from the tree, retained for
/// later synchronization and merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedObject {
    /// UUID of the removed object.
    pub uuid: Uuid,
    /// Deletion time as UTC unix seconds.
    pub deletion_time: u64,
}

impl DeletedObject {
    /// Creates a tombstone for `uuid` stamped with the current time.
    #[must_use]
    pub fn now(uuid: Uuid) -> Self {
        Self {
            uuid,
            deletion_time: now_unix(),
        }
    }
}

/// Returns the current UTC time as unix seconds.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
