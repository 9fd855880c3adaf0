//! Encrypted credential database core.
//!
//! This crate implements the in-memory database object for an encrypted
//! credential store together with its full lifecycle around an on-disk
//! container: opening (decrypt + parse), saving (serialize + encrypt +
//! persist), key management and transformation, modification tracking,
//! and external-change detection.
//!
//! # Architecture
//!
//! The crate is built from four layers:
//!
//! 1. **Key layer** ([`key`]): composite keys assembled from factors
//!    (password, key file, challenge-response token) and the KDF
//!    descriptors that transform them.
//!
//! 2. **Model layer** ([`model`]): the group/entry tree and database
//!    metadata, addressed by UUID.
//!
//! 3. **Container layer** ([`format`]): the binary container codec
//!    with its outer header, session-key derivation, AEAD payload
//!    encryption, and the plaintext export/import path.
//!
//! 4. **Database layer** ([`db`]): the aggregate root, covering the
//!    persistence engine with its three write strategies, the
//!    file-block sentinel that refuses to clobber externally modified
//!    files, the debounced modification tracker, and the process-wide
//!    registry.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod error;
pub mod format;
pub mod key;
pub mod model;
pub mod stream;
pub mod types;

pub use db::{
    database_by_uuid, BackupPolicy, Database, DatabaseEvent, DatabaseHandle, SaveAction,
};
pub use error::{DatabaseError, DatabaseResult, KeyError};
pub use key::{CompositeKey, KdfParams, KeyFileFactor, KeyMaterial, PasswordFactor};
pub use types::{CipherId, CompressionAlgorithm, CustomDataValue, DatabaseId, PublicCustomData};
