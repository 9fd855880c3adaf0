//! Container codec: reads and writes the encrypted container.
//!
//! On write, the codec rotates all session material: the KDF seed is
//! randomized (hence a fresh transformed key), a fresh master seed is
//! generated, and the challenge-response factors are re-queried. The
//! database layer asserts this rotation after every write.

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::db::Database;
use crate::error::{DatabaseError, DatabaseResult};
use crate::key::{CompositeKey, KeyMaterial};
use crate::types::{CipherId, CIPHER_AES256, CIPHER_CHACHA20};

use super::header::OuterHeader;
use super::payload;
use super::MASTER_SEED_SIZE;

/// Domain-separation label for the session key.
const SESSION_KEY_LABEL: &[u8] = b"credvault:session-key:v1";

/// Reads a container from `reader` into `db`.
///
/// With `key == None` only the header is consumed: format version,
/// cipher, compression, KDF descriptor, master seed, and public custom
/// data become visible, and the tree is left untouched.
///
/// # Errors
///
/// Returns a codec error for malformed containers or wrong credentials,
/// a key error if the KDF fails, and an I/O error if the reader fails.
pub fn read_container<R: Read>(
    reader: &mut R,
    key: Option<&std::sync::Arc<CompositeKey>>,
    db: &mut Database,
) -> DatabaseResult<()> {
    let (header, format_version, header_digest) = OuterHeader::decode(reader)?;
    let compression = header.compression_algorithm()?;

    {
        let data = db.data_mut();
        data.format_version = format_version;
        data.cipher = header.cipher;
        data.compression_algorithm = compression;
        data.kdf = header.kdf.clone();
        data.master_seed = KeyMaterial::from_bytes(header.master_seed.clone());
        data.public_custom_data = header.public_custom_data.clone();
    }

    let Some(key) = key else {
        // Header-only open.
        return Ok(());
    };

    let transformed = key.transform(&header.kdf)?;
    {
        let data = db.data_mut();
        data.key = Some(std::sync::Arc::clone(key));
        data.transformed_key = transformed;
    }
    db.challenge_master_seed(&header.master_seed)?;

    let mut nonce_len = [0u8; 1];
    reader
        .read_exact(&mut nonce_len)
        .map_err(|e| DatabaseError::io("reading container nonce", e))?;
    let mut nonce = vec![0u8; nonce_len[0] as usize];
    reader
        .read_exact(&mut nonce)
        .map_err(|e| DatabaseError::io("reading container nonce", e))?;

    let mut ciphertext = Vec::new();
    reader
        .read_to_end(&mut ciphertext)
        .map_err(|e| DatabaseError::io("reading container payload", e))?;

    let session_key = derive_session_key(
        db.data().master_seed.as_bytes(),
        &db.data().transformed_key,
        &db.data().challenge_response_key,
    );
    let plaintext = decrypt_payload(
        header.cipher,
        &session_key,
        &nonce,
        &ciphertext,
        &header_digest,
    )?;

    let doc = payload::decode(&plaintext, compression)?;
    db.install_payload(doc);

    Ok(())
}

/// Writes `db` as a container to `writer`, rotating the KDF seed,
/// transformed key, master seed, and challenge-response key.
///
/// # Errors
///
/// Returns a codec error if no key is present or encryption fails, a
/// key error if the KDF or a challenge factor fails, and an I/O error
/// if the writer fails.
pub fn write_container<W: Write>(writer: &mut W, db: &mut Database) -> DatabaseResult<()> {
    let key = db
        .key()
        .cloned()
        .ok_or_else(|| DatabaseError::codec("cannot write a database without a key"))?;

    // Rotate the transform seed, then the transformed key under it.
    let mut kdf = db.data().kdf.clone();
    kdf.randomize_seed()?;
    let transformed = key.transform(&kdf)?;

    let format_version = db.data().format_version.max(kdf.min_format_version());
    {
        let data = db.data_mut();
        data.kdf = kdf;
        data.transformed_key = transformed;
        data.format_version = format_version;
    }

    // Fresh master seed, re-challenged against the key's tokens.
    let master_seed = KeyMaterial::random(MASTER_SEED_SIZE)?;
    db.challenge_master_seed(master_seed.as_bytes())?;

    let compression = db.data().compression_algorithm;
    let header = OuterHeader {
        cipher: db.data().cipher,
        compression: compression.as_u32(),
        master_seed: master_seed.as_bytes().to_vec(),
        kdf: db.data().kdf.clone(),
        public_custom_data: db.data().public_custom_data.clone(),
        padding: Vec::new(),
    };
    let (header_bytes, header_digest) = header.encode(format_version)?;

    let session_key = derive_session_key(
        master_seed.as_bytes(),
        &db.data().transformed_key,
        &db.data().challenge_response_key,
    );

    let plaintext = payload::encode(&db.payload_doc(), compression)?;
    let (nonce, ciphertext) =
        encrypt_payload(db.data().cipher, &session_key, &plaintext, &header_digest)?;

    let mut out = Vec::with_capacity(header_bytes.len() + 1 + nonce.len() + ciphertext.len());
    out.extend_from_slice(&header_bytes);
    #[allow(clippy::cast_possible_truncation)] // nonce is 12 or 24 bytes
    out.push(nonce.len() as u8);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);

    writer
        .write_all(&out)
        .and_then(|()| writer.flush())
        .map_err(|e| DatabaseError::io("writing container", e))
}

/// Exports the plaintext payload of `db` as pretty JSON.
///
/// # Errors
///
/// Returns a codec error if serialization fails.
pub fn export_payload(db: &Database) -> DatabaseResult<Vec<u8>> {
    payload::to_json(&db.payload_doc())
}

/// Imports a JSON export into `db`, replacing metadata, tree, and
/// tombstones.
///
/// # Errors
///
/// Returns a codec error if the input is not a valid export.
pub fn import_payload(bytes: &[u8], db: &mut Database) -> DatabaseResult<()> {
    let doc = payload::from_json(bytes)?;
    db.install_payload(doc);
    Ok(())
}

/// Derives the per-save session key from the master seed and the key
/// material: HKDF-SHA256 with the master seed as salt over the
/// transformed key concatenated with the challenge-response key.
fn derive_session_key(
    master_seed: &[u8],
    transformed: &KeyMaterial,
    challenge_response: &KeyMaterial,
) -> Zeroizing<[u8; 32]> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(
        transformed.len() + challenge_response.len(),
    ));
    ikm.extend_from_slice(transformed.as_bytes());
    ikm.extend_from_slice(challenge_response.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(master_seed), &ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(SESSION_KEY_LABEL, &mut okm[..])
        .expect("32 bytes is a valid HKDF output length");
    okm
}

fn encrypt_payload(
    cipher: CipherId,
    key: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> DatabaseResult<(Vec<u8>, Vec<u8>)> {
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    if cipher == CIPHER_AES256 {
        let aead = Aes256Gcm::new_from_slice(key).expect("session key is always 32 bytes");
        let nonce = random_nonce::<12>()?;
        let ciphertext = aead
            .encrypt(AesNonce::from_slice(&nonce), payload)
            .map_err(|_| DatabaseError::codec("payload encryption failed"))?;
        Ok((nonce.to_vec(), ciphertext))
    } else if cipher == CIPHER_CHACHA20 {
        let aead = XChaCha20Poly1305::new_from_slice(key).expect("session key is always 32 bytes");
        let nonce = random_nonce::<24>()?;
        let ciphertext = aead
            .encrypt(XNonce::from_slice(&nonce), payload)
            .map_err(|_| DatabaseError::codec("payload encryption failed"))?;
        Ok((nonce.to_vec(), ciphertext))
    } else {
        Err(DatabaseError::codec(format!(
            "unsupported cipher {}",
            hex::encode(cipher.as_bytes())
        )))
    }
}

fn decrypt_payload(
    cipher: CipherId,
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> DatabaseResult<Vec<u8>> {
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    let result = if cipher == CIPHER_AES256 {
        if nonce.len() != 12 {
            return Err(DatabaseError::codec("container nonce has the wrong size"));
        }
        let aead = Aes256Gcm::new_from_slice(key).expect("session key is always 32 bytes");
        aead.decrypt(AesNonce::from_slice(nonce), payload)
    } else if cipher == CIPHER_CHACHA20 {
        if nonce.len() != 24 {
            return Err(DatabaseError::codec("container nonce has the wrong size"));
        }
        let aead = XChaCha20Poly1305::new_from_slice(key).expect("session key is always 32 bytes");
        aead.decrypt(XNonce::from_slice(nonce), payload)
    } else {
        return Err(DatabaseError::codec(format!(
            "unsupported cipher {}",
            hex::encode(cipher.as_bytes())
        )));
    };

    result.map_err(|_| {
        DatabaseError::codec("invalid credentials were provided or the database file is corrupted")
    })
}

fn random_nonce<const N: usize>() -> DatabaseResult<[u8; N]> {
    let mut nonce = [0u8; N];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| DatabaseError::codec(format!("random generator failed: {e}")))?;
    Ok(nonce)
}
