//! Deterministic filename encryption and directory identifier hashing.
//!
//! Names are encrypted with XChaCha20-Poly1305 under a synthetic nonce
//! derived from the name key, the parent directory identifier and the
//! cleartext name. The same name in the same directory always maps to the
//! same ciphertext; the same name in two directories does not. The parent
//! identifier is also bound as associated data, so a ciphertext name copied
//! into another directory fails to decrypt.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use blake2::digest::consts::{U20, U24};
use blake2::{Blake2b, Digest};
use data_encoding::BASE32;
use subtle::ConstantTimeEq;

use crate::aead::{self, NONCE_SIZE};
use crate::keys::NameKey;
use skiff_common::{Error, Result};

const NAME_NONCE_CONTEXT: &[u8] = b"skiff-name-nonce";
const DIR_HASH_CONTEXT: &[u8] = b"skiff-dir-hash";

fn name_nonce(key: &NameKey, dir_id: &str, name: &str) -> [u8; NONCE_SIZE] {
    let mut hasher = Blake2b::<U24>::new();
    hasher.update(key.as_bytes());
    hasher.update((dir_id.len() as u64).to_le_bytes());
    hasher.update(dir_id.as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(NAME_NONCE_CONTEXT);

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&hasher.finalize());
    nonce
}

/// Encrypt a single path segment for storage inside directory `dir_id`.
///
/// # Postconditions
/// - Output is URL-safe base64 without padding
/// - Deterministic for a given (key, dir_id, name)
pub fn encrypt_name(key: &NameKey, dir_id: &str, name: &str) -> Result<String> {
    let nonce = name_nonce(key, dir_id, name);
    let sealed = aead::seal(key.as_bytes(), &nonce, name.as_bytes(), dir_id.as_bytes())?;

    let mut raw = Vec::with_capacity(NONCE_SIZE + sealed.len());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&sealed);
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Decrypt a segment produced by [`encrypt_name`] for the same directory.
///
/// # Errors
/// - `PathTranslation` if the segment is malformed, was encrypted under a
///   different key or directory, or was tampered with
pub fn decrypt_name(key: &NameKey, dir_id: &str, encrypted: &str) -> Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(encrypted)
        .map_err(|e| Error::PathTranslation(format!("Invalid name encoding: {}", e)))?;
    if raw.len() < NONCE_SIZE + aead::TAG_SIZE {
        return Err(Error::PathTranslation("Encrypted name too short".to_string()));
    }

    let (nonce_bytes, sealed) = raw.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    let plain = aead::open(key.as_bytes(), &nonce, sealed, dir_id.as_bytes())
        .map_err(|_| Error::PathTranslation("Name authentication failed".to_string()))?;
    let name = String::from_utf8(plain)
        .map_err(|_| Error::PathTranslation("Decrypted name is not UTF-8".to_string()))?;

    let expected = name_nonce(key, dir_id, &name);
    if !bool::from(expected.ct_eq(&nonce)) {
        return Err(Error::PathTranslation("Name nonce mismatch".to_string()));
    }

    Ok(name)
}

/// Map a directory identifier to its storage folder token.
///
/// Returns 32 uppercase base32 characters. The first two are used as the
/// bucket folder, the remaining thirty as the directory folder.
pub fn hash_directory_id(key: &NameKey, dir_id: &str) -> String {
    let mut hasher = Blake2b::<U20>::new();
    hasher.update(key.as_bytes());
    hasher.update(dir_id.as_bytes());
    hasher.update(DIR_HASH_CONTEXT);
    BASE32.encode(&hasher.finalize())
}

/// Short, stable stand-in for an encrypted name that exceeds the backend
/// length limit.
pub fn shorten_name(encrypted: &str) -> String {
    let digest = Blake2b::<U20>::digest(encrypted.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
