//! Streaming wrappers around the chunked content cryptor.

use futures::{stream, StreamExt};

use skiff_common::Result;
use skiff_crypto::content::{decrypt_chunk, decrypt_chunks, ENCRYPTED_CHUNK_SIZE};
use skiff_crypto::{ContentDecryptor, ContentEncryptor, ContentKey, FileHeader};
use skiff_session::ByteStream;

type EncryptState = (ByteStream, Option<ContentEncryptor>);
type DecryptState = (ByteStream, Option<ContentDecryptor>);

async fn encrypt_step(
    (mut input, mut encryptor): EncryptState,
) -> Result<Option<(Vec<u8>, EncryptState)>> {
    loop {
        let Some(active) = encryptor.as_mut() else {
            return Ok(None);
        };
        match input.next().await {
            Some(chunk) => {
                let out = active.update(&chunk?)?;
                if !out.is_empty() {
                    return Ok(Some((out, (input, encryptor))));
                }
            }
            None => {
                let out = match encryptor.take() {
                    Some(done) => done.finalize()?,
                    None => Vec::new(),
                };
                return Ok(Some((out, (input, None))));
            }
        }
    }
}

async fn decrypt_step(
    (mut input, mut decryptor): DecryptState,
) -> Result<Option<(Vec<u8>, DecryptState)>> {
    loop {
        let Some(active) = decryptor.as_mut() else {
            return Ok(None);
        };
        match input.next().await {
            Some(chunk) => {
                let out = active.update(&chunk?)?;
                if !out.is_empty() {
                    return Ok(Some((out, (input, decryptor))));
                }
            }
            None => {
                let out = match decryptor.take() {
                    Some(done) => done.finalize()?,
                    None => Vec::new(),
                };
                return Ok(Some((out, (input, None))));
            }
        }
    }
}

/// Encrypt a cleartext stream. The output always ends with a final chunk.
pub fn encrypt_stream(key: &ContentKey, input: ByteStream) -> ByteStream {
    Box::pin(stream::try_unfold(
        (input, Some(ContentEncryptor::new(key))),
        encrypt_step,
    ))
}

/// Decrypt a complete ciphertext stream.
///
/// Fails with `Integrity` as soon as a chunk does not authenticate; no
/// bytes of that chunk are emitted.
pub fn decrypt_stream(key: &ContentKey, input: ByteStream) -> ByteStream {
    Box::pin(stream::try_unfold(
        (input, Some(ContentDecryptor::new(key))),
        decrypt_step,
    ))
}

struct RangeState {
    input: ByteStream,
    key: ContentKey,
    header: FileHeader,
    buffer: Vec<u8>,
    index: u64,
    skip: usize,
    remaining: Option<u64>,
    to_eof: bool,
    finished: bool,
}

impl RangeState {
    /// Drop leading bytes and clamp to the requested length.
    fn trim(&mut self, mut plain: Vec<u8>) -> Vec<u8> {
        if self.skip > 0 {
            let n = self.skip.min(plain.len());
            plain.drain(..n);
            self.skip -= n;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            let keep = (*remaining).min(plain.len() as u64);
            plain.truncate(keep as usize);
            *remaining -= keep;
            if *remaining == 0 {
                self.finished = true;
            }
        }
        plain
    }
}

async fn range_step(mut state: RangeState) -> Result<Option<(Vec<u8>, RangeState)>> {
    loop {
        if state.finished {
            return Ok(None);
        }
        if state.buffer.len() > ENCRYPTED_CHUNK_SIZE {
            let rest = state.buffer.split_off(ENCRYPTED_CHUNK_SIZE);
            let chunk = std::mem::replace(&mut state.buffer, rest);
            let plain = decrypt_chunk(&state.key, &state.header, state.index, &chunk, false)?;
            state.index += 1;
            let out = state.trim(plain);
            if !out.is_empty() {
                return Ok(Some((out, state)));
            }
            continue;
        }
        match state.input.next().await {
            Some(chunk) => state.buffer.extend_from_slice(&chunk?),
            None => {
                state.finished = true;
                if state.buffer.is_empty() {
                    return Ok(None);
                }
                let tail = std::mem::take(&mut state.buffer);
                let plain = decrypt_chunks(
                    &state.key,
                    &state.header,
                    state.index,
                    &tail,
                    state.to_eof,
                )?;
                let out = state.trim(plain);
                return Ok(Some((out, state)));
            }
        }
    }
}

/// Decrypt a run of chunks fetched for a range read.
///
/// `input` starts at chunk `first_chunk`; `skip` cleartext bytes are dropped
/// from its start and at most `length` bytes are returned. Set `to_eof` when
/// `input` runs to the end of the file, so its last chunk must be final.
pub fn decrypt_range_stream(
    key: &ContentKey,
    header: FileHeader,
    first_chunk: u64,
    input: ByteStream,
    skip: usize,
    length: Option<u64>,
    to_eof: bool,
) -> ByteStream {
    let state = RangeState {
        input,
        key: key.clone(),
        header,
        buffer: Vec::new(),
        index: first_chunk,
        skip,
        remaining: length,
        to_eof,
        finished: length == Some(0),
    };
    Box::pin(stream::try_unfold(state, range_step))
}

/// Collect the first `len` bytes of a stream.
pub(crate) async fn read_prefix(mut input: ByteStream, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        match input.next().await {
            Some(chunk) => out.extend_from_slice(&chunk?),
            None => break,
        }
    }
    out.truncate(len);
    Ok(out)
}
