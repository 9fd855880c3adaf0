//! Binary container format.
//!
//! A container is an outer header (readable without any key) followed
//! by an AEAD-encrypted payload:
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ magic "CVLT" (4)  │ format version u32 LE  │
//! ├────────────────────────────────────────────┤
//! │ header length u32 LE │ header (bincode)    │
//! │   cipher id, compression, master seed,     │
//! │   KDF descriptor, public custom data       │
//! ├────────────────────────────────────────────┤
//! │ SHA-256 over everything above (32)         │
//! ├────────────────────────────────────────────┤
//! │ nonce length u8 │ nonce │ ciphertext…      │
//! └────────────────────────────────────────────┘
//! ```
//!
//! The header digest doubles as the AEAD associated data, so header
//! tampering fails decryption even though the header itself is
//! plaintext.

pub mod codec;
pub mod header;
pub mod payload;

pub use codec::{export_payload, import_payload, read_container, write_container};
pub use header::OuterHeader;
pub use payload::PayloadDoc;

/// Magic bytes opening every container.
pub const FILE_MAGIC: &[u8; 4] = b"CVLT";

/// Format version 3.1 (legacy KDF only).
pub const FILE_VERSION_3_1: u32 = 0x0003_0001;
/// Format version 4.0 (Argon2, public custom data).
pub const FILE_VERSION_4: u32 = 0x0004_0000;
/// Format version 4.1.
pub const FILE_VERSION_4_1: u32 = 0x0004_0001;
/// Newest version this crate writes.
pub const FILE_VERSION_MAX: u32 = FILE_VERSION_4_1;

/// Mask selecting the major half of a format version.
pub const FILE_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

/// Master seed length in bytes, regenerated on every save.
pub const MASTER_SEED_SIZE: usize = 32;

/// Returns the major component of a format version.
#[must_use]
pub const fn version_major(version: u32) -> u32 {
    version >> 16
}
