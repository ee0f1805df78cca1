//! Chunked content encryption.
//!
//! A ciphertext file is a header followed by a sequence of independently
//! authenticated chunks:
//!
//! ```text
//! header  = version (1) || file nonce (16)
//! chunk_i = nonce (24) || ciphertext || tag (16)
//! ```
//!
//! Every chunk binds the header, its index and whether it is the final chunk
//! as associated data. Swapping, reordering, truncating or splicing chunks
//! between files therefore fails authentication. The final chunk always
//! exists, even for empty content.

use skiff_common::{Error, Result};

use crate::aead::{self, NONCE_SIZE, TAG_SIZE};
use crate::keys::ContentKey;

/// Cleartext bytes per chunk (32 KiB).
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Per-chunk ciphertext overhead.
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Ciphertext bytes of a full chunk.
pub const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + CHUNK_OVERHEAD;

/// Content format version.
pub const CONTENT_VERSION: u8 = 1;

/// Per-file nonce length.
pub const FILE_NONCE_SIZE: usize = 16;

/// Header size: version (1) + file nonce (16).
pub const HEADER_SIZE: usize = 1 + FILE_NONCE_SIZE;

/// Per-file header. The random nonce makes chunk AAD unique to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    nonce: [u8; FILE_NONCE_SIZE],
}

impl FileHeader {
    /// Generate a header with a fresh random nonce.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut nonce = [0u8; FILE_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self { nonce }
    }

    /// Serialize to the on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = CONTENT_VERSION;
        out[1..].copy_from_slice(&self.nonce);
        out
    }

    /// Parse the leading header bytes of a ciphertext file.
    ///
    /// # Errors
    /// - `Integrity` if the input is shorter than a header or has an
    ///   unknown version
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Integrity("Truncated content header".to_string()));
        }
        if data[0] != CONTENT_VERSION {
            return Err(Error::Integrity(format!(
                "Unsupported content version: {}",
                data[0]
            )));
        }
        let mut nonce = [0u8; FILE_NONCE_SIZE];
        nonce.copy_from_slice(&data[1..HEADER_SIZE]);
        Ok(Self { nonce })
    }
}

fn chunk_aad(header: &FileHeader, index: u64, last: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_SIZE + 9);
    aad.extend_from_slice(&header.to_bytes());
    aad.extend_from_slice(&index.to_le_bytes());
    aad.push(u8::from(last));
    aad
}

/// Encrypt one chunk of at most [`CHUNK_SIZE`] bytes.
pub fn encrypt_chunk(
    key: &ContentKey,
    header: &FileHeader,
    index: u64,
    plaintext: &[u8],
    last: bool,
) -> Result<Vec<u8>> {
    debug_assert!(plaintext.len() <= CHUNK_SIZE);
    aead::encrypt_with_aad(key.as_bytes(), plaintext, &chunk_aad(header, index, last))
}

/// Decrypt one chunk.
///
/// # Errors
/// - `Integrity` on any authentication failure
pub fn decrypt_chunk(
    key: &ContentKey,
    header: &FileHeader,
    index: u64,
    ciphertext: &[u8],
    last: bool,
) -> Result<Vec<u8>> {
    aead::decrypt_with_aad(key.as_bytes(), ciphertext, &chunk_aad(header, index, last))
        .map_err(|_| Error::Integrity(format!("Chunk {} failed authentication", index)))
}

/// Decrypt a run of consecutive chunks starting at `first_index`.
///
/// Used for range reads where the caller fetched only part of the file.
/// With `to_eof` the run reaches the end of the file, so its trailing chunk
/// must authenticate as the final one. Otherwise a short trailing chunk must
/// be final and a full-length one may be either.
pub fn decrypt_chunks(
    key: &ContentKey,
    header: &FileHeader,
    first_index: u64,
    data: &[u8],
    to_eof: bool,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut pieces = data.chunks(ENCRYPTED_CHUNK_SIZE).peekable();
    let mut index = first_index;

    while let Some(piece) = pieces.next() {
        let plain = if pieces.peek().is_some() {
            decrypt_chunk(key, header, index, piece, false)?
        } else if to_eof || piece.len() < ENCRYPTED_CHUNK_SIZE {
            decrypt_chunk(key, header, index, piece, true)?
        } else {
            decrypt_chunk(key, header, index, piece, false)
                .or_else(|_| decrypt_chunk(key, header, index, piece, true))?
        };
        out.extend_from_slice(&plain);
        index += 1;
    }

    Ok(out)
}

/// Incremental encryptor.
///
/// Feed cleartext with [`update`](Self::update) and collect the returned
/// ciphertext; [`finalize`](Self::finalize) emits the final chunk. The
/// header is emitted with the first output.
pub struct ContentEncryptor {
    key: ContentKey,
    header: FileHeader,
    buffer: Vec<u8>,
    index: u64,
    header_written: bool,
}

impl ContentEncryptor {
    /// Start encrypting a new file with a fresh header.
    pub fn new(key: &ContentKey) -> Self {
        Self {
            key: key.clone(),
            header: FileHeader::generate(),
            buffer: Vec::with_capacity(CHUNK_SIZE),
            index: 0,
            header_written: false,
        }
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    fn take_header(&mut self, out: &mut Vec<u8>) {
        if !self.header_written {
            out.extend_from_slice(&self.header.to_bytes());
            self.header_written = true;
        }
    }

    /// Consume cleartext, returning any ciphertext that became complete.
    ///
    /// A full chunk is held back until more data arrives, since it could
    /// turn out to be the final one.
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.take_header(&mut out);
        self.buffer.extend_from_slice(data);

        while self.buffer.len() > CHUNK_SIZE {
            let rest = self.buffer.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            out.extend_from_slice(&encrypt_chunk(
                &self.key,
                &self.header,
                self.index,
                &chunk,
                false,
            )?);
            self.index += 1;
        }

        Ok(out)
    }

    /// Emit the final chunk.
    pub fn finalize(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.take_header(&mut out);
        out.extend_from_slice(&encrypt_chunk(
            &self.key,
            &self.header,
            self.index,
            &self.buffer,
            true,
        )?);
        Ok(out)
    }
}

/// Incremental decryptor, the mirror of [`ContentEncryptor`].
pub struct ContentDecryptor {
    key: ContentKey,
    header: Option<FileHeader>,
    buffer: Vec<u8>,
    index: u64,
}

impl ContentDecryptor {
    pub fn new(key: &ContentKey) -> Self {
        Self {
            key: key.clone(),
            header: None,
            buffer: Vec::new(),
            index: 0,
        }
    }

    /// Consume ciphertext, returning cleartext for every chunk known not to
    /// be the last.
    ///
    /// # Errors
    /// - `Integrity` on a bad header or a chunk failing authentication
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let header = match &self.header {
            Some(header) => header.clone(),
            None if self.buffer.len() >= HEADER_SIZE => {
                let header = FileHeader::parse(&self.buffer)?;
                self.buffer.drain(..HEADER_SIZE);
                self.header = Some(header.clone());
                header
            }
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        while self.buffer.len() > ENCRYPTED_CHUNK_SIZE {
            let rest = self.buffer.split_off(ENCRYPTED_CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            out.extend_from_slice(&decrypt_chunk(
                &self.key, &header, self.index, &chunk, false,
            )?);
            self.index += 1;
        }
        Ok(out)
    }

    /// Decrypt the final chunk.
    ///
    /// # Errors
    /// - `Integrity` if the content ended before a final chunk
    pub fn finalize(self) -> Result<Vec<u8>> {
        let header = self
            .header
            .ok_or_else(|| Error::Integrity("Truncated content header".to_string()))?;
        if self.buffer.len() < CHUNK_OVERHEAD {
            return Err(Error::Integrity("Missing final chunk".to_string()));
        }
        decrypt_chunk(&self.key, &header, self.index, &self.buffer, true)
    }
}

/// Encrypt a complete buffer.
pub fn encrypt_bytes(key: &ContentKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut encryptor = ContentEncryptor::new(key);
    let mut out = encryptor.update(data)?;
    out.extend_from_slice(&encryptor.finalize()?);
    Ok(out)
}

/// Decrypt a complete buffer.
pub fn decrypt_bytes(key: &ContentKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut decryptor = ContentDecryptor::new(key);
    let mut out = decryptor.update(data)?;
    out.extend_from_slice(&decryptor.finalize()?);
    Ok(out)
}

/// Ciphertext length for a cleartext of `size` bytes.
pub fn ciphertext_size(size: u64) -> u64 {
    let chunk = CHUNK_SIZE as u64;
    let full = size / chunk;
    let rem = size % chunk;
    let mut total = HEADER_SIZE as u64 + full * ENCRYPTED_CHUNK_SIZE as u64;
    if rem > 0 || size == 0 {
        total += rem + CHUNK_OVERHEAD as u64;
    }
    total
}

/// Cleartext length for a ciphertext of `size` bytes.
///
/// # Errors
/// - `Integrity` if no valid chunk layout has this length
pub fn cleartext_size(size: u64) -> Result<u64> {
    let invalid = || Error::Integrity(format!("Invalid ciphertext length: {}", size));

    let body = size.checked_sub(HEADER_SIZE as u64).ok_or_else(invalid)?;
    if body == 0 {
        return Err(invalid());
    }
    let full = body / ENCRYPTED_CHUNK_SIZE as u64;
    let rem = body % ENCRYPTED_CHUNK_SIZE as u64;
    if rem == 0 {
        return Ok(full * CHUNK_SIZE as u64);
    }
    if rem < CHUNK_OVERHEAD as u64 {
        return Err(invalid());
    }
    Ok(full * CHUNK_SIZE as u64 + rem - CHUNK_OVERHEAD as u64)
}

/// Location of the chunks covering a cleartext byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Index of the first chunk touched.
    pub first_chunk: u64,
    /// Ciphertext offset where that chunk begins.
    pub ciphertext_offset: u64,
    /// Ciphertext bytes to fetch, or `None` to read to the end.
    pub ciphertext_length: Option<u64>,
    /// Cleartext bytes to drop from the start of the first chunk.
    pub skip: usize,
}

/// Map a cleartext range to the ciphertext that must be fetched.
///
/// A range whose end does not fit in a `u64` reads to the end of the file.
pub fn chunk_span(offset: u64, length: Option<u64>) -> ChunkSpan {
    let chunk = CHUNK_SIZE as u64;
    let encrypted = ENCRYPTED_CHUNK_SIZE as u64;
    let first_chunk = offset / chunk;
    let ciphertext_length = length.and_then(|len| {
        let end = offset.checked_add(len)?;
        let end_chunk = end.div_ceil(chunk).max(first_chunk + 1);
        (end_chunk - first_chunk).checked_mul(encrypted)
    });
    ChunkSpan {
        first_chunk,
        ciphertext_offset: first_chunk
            .saturating_mul(encrypted)
            .saturating_add(HEADER_SIZE as u64),
        ciphertext_length,
        skip: (offset % chunk) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ContentKey {
        ContentKey::from_bytes([11u8; 32])
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_roundtrip_various_sizes() {
        for len in [0, 1, 100, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE + 5] {
            let data = sample(len);
            let ct = encrypt_bytes(&key(), &data).unwrap();
            assert_eq!(ct.len() as u64, ciphertext_size(len as u64), "len {}", len);
            assert_eq!(cleartext_size(ct.len() as u64).unwrap(), len as u64);
            assert_eq!(decrypt_bytes(&key(), &ct).unwrap(), data, "len {}", len);
        }
    }

    #[test]
    fn test_empty_content_has_final_chunk() {
        let ct = encrypt_bytes(&key(), b"").unwrap();
        assert_eq!(ct.len(), HEADER_SIZE + CHUNK_OVERHEAD);
    }

    #[test]
    fn test_incremental_feed() {
        let data = sample(2 * CHUNK_SIZE + 300);

        let mut enc = ContentEncryptor::new(&key());
        let mut ct = Vec::new();
        for piece in data.chunks(1000) {
            ct.extend(enc.update(piece).unwrap());
        }
        ct.extend(enc.finalize().unwrap());

        let mut dec = ContentDecryptor::new(&key());
        let mut plain = Vec::new();
        for piece in ct.chunks(777) {
            plain.extend(dec.update(piece).unwrap());
        }
        plain.extend(dec.finalize().unwrap());

        assert_eq!(plain, data);
    }

    #[test]
    fn test_every_byte_flip_detected() {
        let ct = encrypt_bytes(&key(), &sample(100)).unwrap();
        for i in 0..ct.len() {
            let mut tampered = ct.clone();
            tampered[i] ^= 0x01;
            let err = decrypt_bytes(&key(), &tampered).unwrap_err();
            assert!(matches!(err, Error::Integrity(_)), "byte {}", i);
        }
    }

    #[test]
    fn test_truncation_detected() {
        let ct = encrypt_bytes(&key(), &sample(CHUNK_SIZE + 10)).unwrap();
        let truncated = &ct[..HEADER_SIZE + ENCRYPTED_CHUNK_SIZE];
        assert!(matches!(
            decrypt_bytes(&key(), truncated),
            Err(Error::Integrity(_))
        ));
        assert!(matches!(
            decrypt_bytes(&key(), &ct[..HEADER_SIZE]),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_chunk_swap_detected() {
        let ct = encrypt_bytes(&key(), &sample(2 * CHUNK_SIZE + 1)).unwrap();
        let body = &ct[HEADER_SIZE..];
        let mut swapped = ct[..HEADER_SIZE].to_vec();
        swapped.extend_from_slice(&body[ENCRYPTED_CHUNK_SIZE..2 * ENCRYPTED_CHUNK_SIZE]);
        swapped.extend_from_slice(&body[..ENCRYPTED_CHUNK_SIZE]);
        swapped.extend_from_slice(&body[2 * ENCRYPTED_CHUNK_SIZE..]);

        assert!(matches!(
            decrypt_bytes(&key(), &swapped),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let ct = encrypt_bytes(&key(), b"secret").unwrap();
        let other = ContentKey::from_bytes([12u8; 32]);
        assert!(matches!(decrypt_bytes(&other, &ct), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_range_decrypt() {
        let data = sample(3 * CHUNK_SIZE + 17);
        let ct = encrypt_bytes(&key(), &data).unwrap();
        let header = FileHeader::parse(&ct).unwrap();

        for (offset, len) in [(0u64, 10u64), (CHUNK_SIZE as u64 - 3, 10), (2 * CHUNK_SIZE as u64 + 5, 100_000)] {
            let span = chunk_span(offset, Some(len));
            let start = span.ciphertext_offset as usize;
            let end = span
                .ciphertext_length
                .map(|l| (start + l as usize).min(ct.len()))
                .unwrap_or(ct.len());
            let to_eof = span.ciphertext_length.is_none();
            let plain =
                decrypt_chunks(&key(), &header, span.first_chunk, &ct[start..end], to_eof).unwrap();
            let got: Vec<u8> = plain.into_iter().skip(span.skip).take(len as usize).collect();

            let want_end = ((offset + len) as usize).min(data.len());
            assert_eq!(got, &data[offset as usize..want_end]);
        }
    }

    #[test]
    fn test_range_to_eof_requires_final_chunk() {
        let ct = encrypt_bytes(&key(), &sample(3 * CHUNK_SIZE + 5)).unwrap();
        let header = FileHeader::parse(&ct).unwrap();
        let cut = &ct[..HEADER_SIZE + 2 * ENCRYPTED_CHUNK_SIZE];

        let span = chunk_span(CHUNK_SIZE as u64, None);
        let start = span.ciphertext_offset as usize;
        assert!(matches!(
            decrypt_chunks(&key(), &header, span.first_chunk, &cut[start..], true),
            Err(Error::Integrity(_))
        ));

        // A bounded range ending at the same boundary is fine.
        let plain = decrypt_chunks(&key(), &header, span.first_chunk, &cut[start..], false).unwrap();
        assert_eq!(plain.len(), CHUNK_SIZE);
    }

    #[test]
    fn test_range_to_eof_accepts_full_final_chunk() {
        let data = sample(2 * CHUNK_SIZE);
        let ct = encrypt_bytes(&key(), &data).unwrap();
        let header = FileHeader::parse(&ct).unwrap();

        let span = chunk_span(CHUNK_SIZE as u64, None);
        let start = span.ciphertext_offset as usize;
        let plain = decrypt_chunks(&key(), &header, span.first_chunk, &ct[start..], true).unwrap();
        assert_eq!(plain, &data[CHUNK_SIZE..]);
    }

    #[test]
    fn test_chunk_span_huge_length() {
        let span = chunk_span(10, Some(u64::MAX));
        assert_eq!(span.first_chunk, 0);
        assert_eq!(span.ciphertext_offset, HEADER_SIZE as u64);
        assert_eq!(span.ciphertext_length, None);
        assert_eq!(span.skip, 10);

        let far = chunk_span(u64::MAX, Some(1));
        assert_eq!(far.ciphertext_length, None);
        assert_eq!(far.ciphertext_offset, u64::MAX);
    }

    #[test]
    fn test_cleartext_size_rejects_impossible_lengths() {
        assert!(cleartext_size(0).is_err());
        assert!(cleartext_size(HEADER_SIZE as u64).is_err());
        assert!(cleartext_size(HEADER_SIZE as u64 + 10).is_err());
    }

    #[test]
    fn test_bad_header_version() {
        let mut ct = encrypt_bytes(&key(), b"x").unwrap();
        ct[0] = 9;
        assert!(matches!(FileHeader::parse(&ct), Err(Error::Integrity(_))));
    }
}
