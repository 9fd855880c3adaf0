//! Outer container header: the part readable without a key.

use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DatabaseError, DatabaseResult};
use crate::key::KdfParams;
use crate::stream::FILE_BLOCK_HASH_SIZE;
use crate::types::{CipherId, CompressionAlgorithm, PublicCustomData, COMPRESSION_ALGORITHM_MAX};

use super::{version_major, FILE_MAGIC, FILE_VERSION_MAX, MASTER_SEED_SIZE};

/// Upper bound on the serialized header, to reject nonsense length
/// prefixes before allocating.
const MAX_HEADER_SIZE: u32 = 16 * 1024 * 1024;

/// Everything the container stores outside the encrypted payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OuterHeader {
    /// Bulk cipher tag.
    pub cipher: CipherId,
    /// Compression algorithm wire value.
    pub compression: u32,
    /// Per-save master seed.
    pub master_seed: Vec<u8>,
    /// KDF descriptor including its transform seed.
    pub kdf: KdfParams,
    /// Public custom data.
    pub public_custom_data: PublicCustomData,
    /// Random padding bringing the plaintext header region up to the
    /// sentinel block size, so the first-block digest always covers
    /// the complete header. Rewritten on every save.
    pub padding: Vec<u8>,
}

impl OuterHeader {
    /// Serializes the header.
    ///
    /// The header region is padded up to the sentinel block size, then
    /// returned as the complete on-disk prefix (magic, version,
    /// length, body, digest) together with the digest, which callers
    /// feed to the AEAD as associated data.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails or the RNG is
    /// unavailable.
    pub fn encode(&self, format_version: u32) -> DatabaseResult<(Vec<u8>, [u8; 32])> {
        let mut padded = self.clone();
        padded.padding.clear();
        let unpadded_len = bincode::serialize(&padded)
            .map_err(|e| DatabaseError::codec(format!("header serialization failed: {e}")))?
            .len();

        // magic + version + length prefix + body + digest
        let framed_len = 4 + 4 + 4 + unpadded_len + 32;
        if framed_len < FILE_BLOCK_HASH_SIZE {
            let mut pad = vec![0u8; FILE_BLOCK_HASH_SIZE - framed_len];
            getrandom::getrandom(&mut pad)
                .map_err(|e| DatabaseError::codec(format!("random generator failed: {e}")))?;
            padded.padding = pad;
        }

        let body = bincode::serialize(&padded)
            .map_err(|e| DatabaseError::codec(format!("header serialization failed: {e}")))?;

        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_HEADER_SIZE in practice
        let body_len = body.len() as u32;

        let mut out = Vec::with_capacity(4 + 4 + 4 + body.len() + 32);
        out.extend_from_slice(FILE_MAGIC);
        out.extend_from_slice(&format_version.to_le_bytes());
        out.extend_from_slice(&body_len.to_le_bytes());
        out.extend_from_slice(&body);

        let digest: [u8; 32] = Sha256::digest(&out).into();
        out.extend_from_slice(&digest);

        Ok((out, digest))
    }

    /// Parses and validates a header from `reader`.
    ///
    /// Returns the header, the format version, and the header digest.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the magic, version, digest, cipher,
    /// compression, or master seed are invalid, or an I/O error if the
    /// reader fails.
    pub fn decode<R: Read>(reader: &mut R) -> DatabaseResult<(Self, u32, [u8; 32])> {
        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic)?;
        if &magic != FILE_MAGIC {
            return Err(DatabaseError::codec("not a credential database container"));
        }

        let mut word = [0u8; 4];
        read_exact(reader, &mut word)?;
        let format_version = u32::from_le_bytes(word);
        if version_major(format_version) < 3
            || version_major(format_version) > version_major(FILE_VERSION_MAX)
        {
            return Err(DatabaseError::codec(format!(
                "unsupported container version {}.{}",
                version_major(format_version),
                format_version & 0xFFFF
            )));
        }

        read_exact(reader, &mut word)?;
        let body_len = u32::from_le_bytes(word);
        if body_len > MAX_HEADER_SIZE {
            return Err(DatabaseError::codec("header length out of bounds"));
        }

        let mut body = vec![0u8; body_len as usize];
        read_exact(reader, &mut body)?;

        let mut hasher = Sha256::new();
        hasher.update(FILE_MAGIC);
        hasher.update(format_version.to_le_bytes());
        hasher.update(body_len.to_le_bytes());
        hasher.update(&body);
        let computed: [u8; 32] = hasher.finalize().into();

        let mut stored = [0u8; 32];
        read_exact(reader, &mut stored)?;
        if stored != computed {
            return Err(DatabaseError::codec("header checksum mismatch"));
        }

        let header: Self = bincode::deserialize(&body)
            .map_err(|e| DatabaseError::codec(format!("malformed header: {e}")))?;
        header.validate()?;

        Ok((header, format_version, computed))
    }

    fn validate(&self) -> DatabaseResult<()> {
        if !self.cipher.is_supported() {
            return Err(DatabaseError::codec(format!(
                "unsupported cipher {}",
                hex::encode(self.cipher.as_bytes())
            )));
        }
        if self.compression > COMPRESSION_ALGORITHM_MAX {
            return Err(DatabaseError::codec(format!(
                "unsupported compression algorithm {}",
                self.compression
            )));
        }
        if self.master_seed.len() != MASTER_SEED_SIZE {
            return Err(DatabaseError::codec("master seed has the wrong size"));
        }
        Ok(())
    }

    /// The compression algorithm named by this header.
    ///
    /// # Errors
    ///
    /// Returns a codec error for out-of-range wire values.
    pub fn compression_algorithm(&self) -> DatabaseResult<CompressionAlgorithm> {
        CompressionAlgorithm::try_from(self.compression)
            .map_err(|v| DatabaseError::codec(format!("unsupported compression algorithm {v}")))
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> DatabaseResult<()> {
    reader
        .read_exact(buf)
        .map_err(|e| DatabaseError::io("reading container header", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FILE_VERSION_4_1;
    use crate::types::CIPHER_CHACHA20;

    fn sample_header() -> OuterHeader {
        OuterHeader {
            cipher: CIPHER_CHACHA20,
            compression: CompressionAlgorithm::Gzip.as_u32(),
            master_seed: vec![7u8; MASTER_SEED_SIZE],
            kdf: KdfParams::AesKdf {
                rounds: 64,
                seed: vec![9u8; 32],
            },
            public_custom_data: PublicCustomData::new(),
            padding: Vec::new(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let header = sample_header();
        let (bytes, digest) = header.encode(FILE_VERSION_4_1).unwrap();

        let (decoded, version, decoded_digest) =
            OuterHeader::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded.cipher, header.cipher);
        assert_eq!(decoded.compression, header.compression);
        assert_eq!(decoded.master_seed, header.master_seed);
        assert_eq!(decoded.kdf, header.kdf);
        assert_eq!(decoded.public_custom_data, header.public_custom_data);
        assert_eq!(version, FILE_VERSION_4_1);
        assert_eq!(decoded_digest, digest);
    }

    #[test]
    fn header_region_fills_the_sentinel_block() {
        let (bytes, _) = sample_header().encode(FILE_VERSION_4_1).unwrap();
        assert!(bytes.len() >= FILE_BLOCK_HASH_SIZE);
        // Padding is random, so two encodings differ.
        let (other, _) = sample_header().encode(FILE_VERSION_4_1).unwrap();
        assert_ne!(bytes, other);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let (mut bytes, _) = sample_header().encode(FILE_VERSION_4_1).unwrap();
        bytes[0] = b'X';
        let err = OuterHeader::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(format!("{err}").contains("not a credential database"));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let (bytes, _) = sample_header().encode(0x0009_0000).unwrap();
        let err = OuterHeader::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(format!("{err}").contains("unsupported container version"));
    }

    #[test]
    fn minor_version_beyond_max_is_accepted() {
        let (bytes, _) = sample_header().encode(FILE_VERSION_4_1 + 1).unwrap();
        let (_, version, _) = OuterHeader::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(version, FILE_VERSION_4_1 + 1);
    }

    #[test]
    fn corrupted_body_fails_the_checksum() {
        let (mut bytes, _) = sample_header().encode(FILE_VERSION_4_1).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = OuterHeader::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(format!("{err}").contains("checksum"));
    }

    #[test]
    fn bad_master_seed_size_is_rejected() {
        let mut header = sample_header();
        header.master_seed = vec![1u8; 8];
        let (bytes, _) = header.encode(FILE_VERSION_4_1).unwrap();
        let err = OuterHeader::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(format!("{err}").contains("master seed"));
    }

    #[test]
    fn truncated_header_is_an_io_error() {
        let (bytes, _) = sample_header().encode(FILE_VERSION_4_1).unwrap();
        let err = OuterHeader::decode(&mut &bytes[..10]).unwrap_err();
        assert!(matches!(err, DatabaseError::Io { .. }));
    }
}
