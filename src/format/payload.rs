//! Inner payload serialization.
//!
//! The payload is the encrypted half of a container: metadata, the
//! credential tree, and the deleted-object tombstones. It is carried
//! as bincode (optionally gzipped) inside the AEAD envelope, and as
//! pretty JSON on the plaintext export/import path.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, DatabaseResult};
use crate::model::{Group, Metadata};
use crate::types::{CompressionAlgorithm, DeletedObject};

/// The complete decrypted payload of one container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayloadDoc {
    /// Database metadata.
    pub metadata: Metadata,
    /// Root of the credential tree.
    pub root: Group,
    /// Tombstones for merge/sync.
    pub deleted_objects: Vec<DeletedObject>,
}

/// Serializes `doc` and applies `compression`.
///
/// # Errors
///
/// Returns a codec error if serialization or compression fails.
pub fn encode(doc: &PayloadDoc, compression: CompressionAlgorithm) -> DatabaseResult<Vec<u8>> {
    let raw = bincode::serialize(doc)
        .map_err(|e| DatabaseError::codec(format!("payload serialization failed: {e}")))?;

    match compression {
        CompressionAlgorithm::None => Ok(raw),
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&raw)
                .and_then(|()| encoder.finish())
                .map_err(|e| DatabaseError::codec(format!("payload compression failed: {e}")))
        }
    }
}

/// Reverses [`encode`].
///
/// # Errors
///
/// Returns a codec error if decompression or deserialization fails.
pub fn decode(bytes: &[u8], compression: CompressionAlgorithm) -> DatabaseResult<PayloadDoc> {
    let raw = match compression {
        CompressionAlgorithm::None => bytes.to_vec(),
        CompressionAlgorithm::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| DatabaseError::codec(format!("payload decompression failed: {e}")))?;
            out
        }
    };

    bincode::deserialize(&raw)
        .map_err(|e| DatabaseError::codec(format!("malformed payload: {e}")))
}

/// Renders `doc` as pretty JSON for the plaintext export path.
///
/// # Errors
///
/// Returns a codec error if serialization fails.
pub fn to_json(doc: &PayloadDoc) -> DatabaseResult<Vec<u8>> {
    serde_json::to_vec_pretty(doc)
        .map_err(|e| DatabaseError::codec(format!("payload export failed: {e}")))
}

/// Parses a JSON export produced by [`to_json`].
///
/// # Errors
///
/// Returns a codec error if the input is not a valid export.
pub fn from_json(bytes: &[u8]) -> DatabaseResult<PayloadDoc> {
    serde_json::from_slice(bytes)
        .map_err(|e| DatabaseError::codec(format!("malformed payload export: {e}")))
}
