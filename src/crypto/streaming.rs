//! Chunked (streaming) AEAD container for large payloads.
//!
//! ```text
//! [magic "VKS1": 4][version: 1][chunk_size: u32 BE][total_chunks: u32 BE]
//! [original_size: u64 BE][base_nonce: 12]
//! then total_chunks x [ct_len: u32 BE][ciphertext + 16-byte tag]
//! ```
//!
//! Chunk `i` is sealed under `base_nonce XOR (0..0 || i as u32 BE)` with the
//! 33-byte header as associated data.  Because the nonce commits to the
//! chunk's position, a chunk that was moved, duplicated or dropped fails to
//! open at the position where it now sits, and decoding reports
//! `ChunkOrderingViolation` for that index.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use aes_gcm::Aes256Gcm;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::encryption::{self, cipher_for, open_with_nonce, seal_with_nonce, NONCE_LEN, TAG_LEN};
use crate::errors::{Result, VaultKeepError};

/// Magic bytes at the start of every streaming container.
pub const STREAM_MAGIC: &[u8; 4] = b"VKS1";

/// Current streaming format version.
pub const STREAM_VERSION: u8 = 1;

/// Fixed header size: 4 + 1 + 4 + 4 + 8 + 12.
pub const STREAM_HEADER_LEN: usize = 33;

/// Size prefix in front of each chunk record.
const CHUNK_PREFIX_LEN: usize = 4;

/// Default plaintext bytes per chunk (256 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

/// Default size above which payloads are streamed (1 MiB).
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Parsed streaming container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u8,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub original_size: u64,
    pub base_nonce: [u8; NONCE_LEN],
}

impl StreamHeader {
    /// Serialize to the 33-byte wire form.
    pub fn to_bytes(&self) -> [u8; STREAM_HEADER_LEN] {
        let mut out = [0u8; STREAM_HEADER_LEN];
        out[0..4].copy_from_slice(STREAM_MAGIC);
        out[4] = self.version;
        out[5..9].copy_from_slice(&self.chunk_size.to_be_bytes());
        out[9..13].copy_from_slice(&self.total_chunks.to_be_bytes());
        out[13..21].copy_from_slice(&self.original_size.to_be_bytes());
        out[21..33].copy_from_slice(&self.base_nonce);
        out
    }

    /// Parse the header at the front of `blob`.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < STREAM_HEADER_LEN {
            return Err(VaultKeepError::InvalidFormat(
                "streaming container shorter than its header".into(),
            ));
        }
        if !is_streaming_format(blob) {
            return Err(VaultKeepError::InvalidFormat(
                "missing streaming magic bytes".into(),
            ));
        }

        let version = blob[4];
        if version != STREAM_VERSION {
            return Err(VaultKeepError::InvalidFormat(format!(
                "unsupported streaming version {version}, expected {STREAM_VERSION}"
            )));
        }

        let chunk_size = u32::from_be_bytes(read_array(blob, 5)?);
        let total_chunks = u32::from_be_bytes(read_array(blob, 9)?);
        let original_size = u64::from_be_bytes(read_array(blob, 13)?);
        let base_nonce: [u8; NONCE_LEN] = read_array(blob, 21)?;

        if chunk_size == 0 {
            return Err(VaultKeepError::InvalidFormat(
                "streaming chunk size cannot be zero".into(),
            ));
        }

        Ok(Self {
            version,
            chunk_size,
            total_chunks,
            original_size,
            base_nonce,
        })
    }
}

fn read_array<const N: usize>(blob: &[u8], at: usize) -> Result<[u8; N]> {
    blob.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| VaultKeepError::InvalidFormat("truncated streaming header".into()))
}

/// Derive the nonce for chunk `index`: the big-endian index is XOR-ed
/// into the low four bytes of the base nonce.
pub fn chunk_nonce(base: &[u8; NONCE_LEN], index: u32) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (dst, b) in nonce[NONCE_LEN - 4..].iter_mut().zip(index.to_be_bytes()) {
        *dst ^= b;
    }
    nonce
}

/// Cheap magic check, usable before picking a decode path.
pub fn is_streaming_format(blob: &[u8]) -> bool {
    blob.len() >= STREAM_HEADER_LEN && &blob[0..4] == STREAM_MAGIC
}

// ---------------------------------------------------------------------------
// StreamingCipher
// ---------------------------------------------------------------------------

/// How a payload was encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    SingleShot,
    Streaming,
}

/// A sealed payload together with the plaintext size and the encoding
/// that was actually used for it.
#[derive(Debug)]
pub struct StagedPayload {
    pub sealed: Vec<u8>,
    pub size: u64,
    pub encoding: PayloadEncoding,
}

/// Stateless encoder that picks single-shot or chunked encoding by size.
///
/// Holds only configuration, so one instance can be shared freely across
/// threads.
#[derive(Debug, Clone, Copy)]
pub struct StreamingCipher {
    chunk_size: u32,
    threshold: u64,
}

impl Default for StreamingCipher {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threshold: DEFAULT_STREAMING_THRESHOLD,
        }
    }
}

impl StreamingCipher {
    /// Build a cipher with an explicit chunk size and streaming threshold.
    pub fn new(chunk_size: u32, threshold: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(VaultKeepError::ConfigError(
                "chunk_size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            chunk_size,
            threshold,
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Returns `true` if a payload of `len` bytes will be streamed.
    pub fn streams(&self, len: u64) -> bool {
        len > self.threshold
    }

    /// Encrypt `source`, streaming when it exceeds the threshold.
    pub fn encrypt_for_staging(&self, source: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if self.streams(source.len() as u64) {
            self.encrypt_streaming(source, key)
        } else {
            encryption::encrypt(key, source)
        }
    }

    /// Always produce a streaming container, regardless of size.
    pub fn encrypt_streaming(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let mut base_nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut base_nonce);
        seal_stream(
            key,
            self.chunk_size,
            base_nonce,
            plaintext.len() as u64,
            plaintext,
        )
    }

    /// Encrypt `source` and report the encoding chosen for it.
    pub fn stage(&self, source: &[u8], key: &[u8]) -> Result<StagedPayload> {
        let size = source.len() as u64;
        Ok(StagedPayload {
            sealed: self.encrypt_for_staging(source, key)?,
            size,
            encoding: self.encoding_for(size),
        })
    }

    /// The encoding `encrypt_for_staging` picks for a payload of `len` bytes.
    pub fn encoding_for(&self, len: u64) -> PayloadEncoding {
        if self.streams(len) {
            PayloadEncoding::Streaming
        } else {
            PayloadEncoding::SingleShot
        }
    }

    /// Encrypt a plaintext file from disk.
    ///
    /// Large files are read one chunk at a time, so only a single chunk of
    /// plaintext is buffered in memory.  The size and encoding come from
    /// the same metadata read that picked the encoding, so they always
    /// describe the returned ciphertext.
    pub fn encrypt_file_for_staging(&self, path: &Path, key: &[u8]) -> Result<StagedPayload> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        if !self.streams(size) {
            // Read at most `size` bytes so a file growing underneath us
            // cannot push a single-shot payload past the threshold.
            let mut plaintext = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
            (&mut file).take(size).read_to_end(&mut plaintext)?;
            let sealed = encryption::encrypt(key, &plaintext);
            let size = plaintext.len() as u64;
            zeroize::Zeroize::zeroize(&mut plaintext);
            return Ok(StagedPayload {
                sealed: sealed?,
                size,
                encoding: PayloadEncoding::SingleShot,
            });
        }

        let cipher = cipher_for(key)?;
        let mut base_nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut base_nonce);
        let header = header_for(self.chunk_size, base_nonce, size)?;
        let aad = header.to_bytes();

        let mut out = Vec::with_capacity(stream_capacity(&header));
        out.extend_from_slice(&aad);

        let mut buf = zeroize::Zeroizing::new(vec![0u8; self.chunk_size as usize]);
        let mut remaining = size;
        for index in 0..header.total_chunks {
            let take = remaining.min(u64::from(self.chunk_size)) as usize;
            file.read_exact(&mut buf[..take])?;
            push_chunk(&mut out, &cipher, &base_nonce, index, &buf[..take], &aad)?;
            remaining -= take as u64;
        }

        Ok(StagedPayload {
            sealed: out,
            size,
            encoding: PayloadEncoding::Streaming,
        })
    }
}

fn header_for(chunk_size: u32, base_nonce: [u8; NONCE_LEN], size: u64) -> Result<StreamHeader> {
    let total_chunks = u32::try_from(size.div_ceil(u64::from(chunk_size))).map_err(|_| {
        VaultKeepError::EncryptionFailed(format!(
            "payload of {size} bytes needs more than {} chunks",
            u32::MAX
        ))
    })?;
    Ok(StreamHeader {
        version: STREAM_VERSION,
        chunk_size,
        total_chunks,
        original_size: size,
        base_nonce,
    })
}

fn stream_capacity(header: &StreamHeader) -> usize {
    let per_chunk = CHUNK_PREFIX_LEN + TAG_LEN;
    usize::try_from(header.original_size)
        .unwrap_or(0)
        .saturating_add(STREAM_HEADER_LEN)
        .saturating_add(per_chunk.saturating_mul(header.total_chunks as usize))
}

fn push_chunk(
    out: &mut Vec<u8>,
    cipher: &Aes256Gcm,
    base_nonce: &[u8; NONCE_LEN],
    index: u32,
    chunk: &[u8],
    aad: &[u8],
) -> Result<()> {
    let sealed = seal_with_nonce(cipher, &chunk_nonce(base_nonce, index), chunk, aad)?;
    let len = u32::try_from(sealed.len()).map_err(|_| {
        VaultKeepError::EncryptionFailed("chunk ciphertext exceeds u32::MAX".into())
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&sealed);
    Ok(())
}

/// Build a streaming container declaring `declared_size` bytes.
fn seal_stream(
    key: &[u8],
    chunk_size: u32,
    base_nonce: [u8; NONCE_LEN],
    declared_size: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let mut header = header_for(chunk_size, base_nonce, plaintext.len() as u64)?;
    header.original_size = declared_size;
    let aad = header.to_bytes();

    let mut out = Vec::with_capacity(stream_capacity(&header));
    out.extend_from_slice(&aad);

    for (index, chunk) in (0u32..).zip(plaintext.chunks(chunk_size as usize)) {
        push_chunk(&mut out, &cipher, &base_nonce, index, chunk, &aad)?;
    }

    Ok(out)
}

/// Decrypt a streaming container.
///
/// Every chunk is opened with the nonce expected at its position, so a
/// chunk found at the wrong position (or missing) is reported as
/// `ChunkOrderingViolation` for that index.
pub fn decrypt_streaming(blob: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let header = StreamHeader::parse(blob)?;
    let aad = &blob[..STREAM_HEADER_LEN];

    let capacity = usize::try_from(header.original_size)
        .unwrap_or(usize::MAX)
        .min(blob.len());
    let mut plaintext = Vec::with_capacity(capacity);
    let mut pos = STREAM_HEADER_LEN;

    for index in 0..header.total_chunks {
        let violation = || VaultKeepError::ChunkOrderingViolation { index };

        let prefix: [u8; CHUNK_PREFIX_LEN] = blob
            .get(pos..pos + CHUNK_PREFIX_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(violation)?;
        pos += CHUNK_PREFIX_LEN;

        let len = u32::from_be_bytes(prefix) as usize;
        let end = pos.checked_add(len).ok_or_else(violation)?;
        let sealed = blob.get(pos..end).ok_or_else(violation)?;
        pos = end;

        let nonce = chunk_nonce(&header.base_nonce, index);
        let chunk = open_with_nonce(&cipher, &nonce, sealed, aad).ok_or_else(violation)?;
        plaintext.extend_from_slice(&chunk);
    }

    // Anything after the last declared chunk was appended by someone else.
    if pos != blob.len() {
        return Err(VaultKeepError::ChunkOrderingViolation {
            index: header.total_chunks,
        });
    }

    let actual = plaintext.len() as u64;
    if actual != header.original_size {
        return Err(VaultKeepError::LengthMismatch {
            expected: header.original_size,
            actual,
        });
    }

    Ok(plaintext)
}

/// Decrypt either format, dispatching on the streaming magic.
pub fn decrypt_any(blob: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if is_streaming_format(blob) {
        decrypt_streaming(blob, key)
    } else {
        encryption::decrypt(key, blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: [u8; 32] = [0x5Au8; 32];

    /// Byte ranges (including size prefix) of each chunk record.
    fn chunk_ranges(blob: &[u8]) -> Vec<std::ops::Range<usize>> {
        let header = StreamHeader::parse(blob).unwrap();
        let mut pos = STREAM_HEADER_LEN;
        let mut ranges = Vec::new();
        for _ in 0..header.total_chunks {
            let len = u32::from_be_bytes(blob[pos..pos + 4].try_into().unwrap()) as usize;
            ranges.push(pos..pos + 4 + len);
            pos += 4 + len;
        }
        ranges
    }

    #[test]
    fn chunk_nonces_are_distinct_and_deterministic() {
        let base = [0xEEu8; NONCE_LEN];
        assert_eq!(chunk_nonce(&base, 0), base);
        assert_ne!(chunk_nonce(&base, 1), chunk_nonce(&base, 2));
        assert_eq!(chunk_nonce(&base, 7), chunk_nonce(&base, 7));
        assert_eq!(chunk_nonce(&base, 1)[..8], base[..8]);
    }

    #[test]
    fn header_roundtrips_through_wire_form() {
        let header = StreamHeader {
            version: STREAM_VERSION,
            chunk_size: 4096,
            total_chunks: 3,
            original_size: 10_000,
            base_nonce: [9u8; NONCE_LEN],
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), STREAM_HEADER_LEN);
        assert_eq!(StreamHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn small_payload_stays_single_shot() {
        let cipher = StreamingCipher::new(16, 64).unwrap();
        let blob = cipher.encrypt_for_staging(&[1u8; 64], &KEY).unwrap();
        assert!(!is_streaming_format(&blob));
        assert_eq!(blob.len(), 64 + encryption::OVERHEAD);
        assert_eq!(decrypt_any(&blob, &KEY).unwrap(), vec![1u8; 64]);
    }

    #[test]
    fn payload_above_threshold_is_streamed() {
        let cipher = StreamingCipher::new(16, 64).unwrap();
        let data: Vec<u8> = (0..65u8).collect();
        let blob = cipher.encrypt_for_staging(&data, &KEY).unwrap();
        assert!(is_streaming_format(&blob));
        assert_eq!(StreamHeader::parse(&blob).unwrap().total_chunks, 5);
        assert_eq!(decrypt_streaming(&blob, &KEY).unwrap(), data);
    }

    #[test]
    fn empty_stream_has_no_chunks() {
        let cipher = StreamingCipher::new(16, 0).unwrap();
        let blob = cipher.encrypt_streaming(b"", &KEY).unwrap();
        assert_eq!(blob.len(), STREAM_HEADER_LEN);
        assert!(decrypt_streaming(&blob, &KEY).unwrap().is_empty());
    }

    #[test]
    fn declared_size_disagreeing_with_chunks_is_a_length_mismatch() {
        let blob = seal_stream(&KEY, 8, [3u8; NONCE_LEN], 100, &[7u8; 20]).unwrap();
        match decrypt_streaming(&blob, &KEY) {
            Err(VaultKeepError::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, 100);
                assert_eq!(actual, 20);
            }
            other => panic!("expected LengthMismatch, got {other:?}"),
        }
    }

    #[test]
    fn dropped_final_chunk_is_an_ordering_violation() {
        let cipher = StreamingCipher::new(8, 0).unwrap();
        let blob = cipher.encrypt_streaming(&[4u8; 24], &KEY).unwrap();
        let ranges = chunk_ranges(&blob);
        let truncated = &blob[..ranges[2].start];
        assert!(matches!(
            decrypt_streaming(truncated, &KEY),
            Err(VaultKeepError::ChunkOrderingViolation { index: 2 })
        ));
    }

    #[test]
    fn appended_chunk_is_an_ordering_violation() {
        let cipher = StreamingCipher::new(8, 0).unwrap();
        let mut blob = cipher.encrypt_streaming(&[4u8; 24], &KEY).unwrap();
        let ranges = chunk_ranges(&blob);
        let first = blob[ranges[0].clone()].to_vec();
        blob.extend_from_slice(&first);
        assert!(matches!(
            decrypt_streaming(&blob, &KEY),
            Err(VaultKeepError::ChunkOrderingViolation { index: 3 })
        ));
    }

    #[test]
    fn tampered_header_fails_first_chunk() {
        let cipher = StreamingCipher::new(8, 0).unwrap();
        let mut blob = cipher.encrypt_streaming(&[4u8; 24], &KEY).unwrap();
        // Bump the declared size; the header is bound into every chunk.
        blob[20] ^= 0x01;
        assert!(matches!(
            decrypt_streaming(&blob, &KEY),
            Err(VaultKeepError::ChunkOrderingViolation { index: 0 })
        ));
    }

    #[test]
    fn file_staging_matches_in_memory_staging() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plain.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&data)
            .unwrap();

        let cipher = StreamingCipher::new(128, 512).unwrap();
        let staged = cipher.encrypt_file_for_staging(&path, &KEY).unwrap();
        assert_eq!(staged.encoding, PayloadEncoding::Streaming);
        assert_eq!(staged.size, 1000);
        assert!(is_streaming_format(&staged.sealed));
        assert_eq!(StreamHeader::parse(&staged.sealed).unwrap().total_chunks, 8);
        assert_eq!(decrypt_any(&staged.sealed, &KEY).unwrap(), data);
    }

    #[test]
    fn small_file_staging_reports_single_shot() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"short note").unwrap();

        let cipher = StreamingCipher::new(128, 512).unwrap();
        let staged = cipher.encrypt_file_for_staging(&path, &KEY).unwrap();
        assert_eq!(staged.encoding, PayloadEncoding::SingleShot);
        assert_eq!(staged.size, 10);
        assert_eq!(staged.sealed.len(), 10 + encryption::OVERHEAD);
        assert_eq!(decrypt_any(&staged.sealed, &KEY).unwrap(), b"short note");
    }

    #[test]
    fn single_chunk_stream_roundtrip() {
        let cipher = StreamingCipher::new(32, 0).unwrap();
        let data = [0x61u8; 20];
        let blob = cipher.encrypt_streaming(&data, &KEY).unwrap();
        assert_eq!(StreamHeader::parse(&blob).unwrap().total_chunks, 1);
        assert_eq!(chunk_ranges(&blob).len(), 1);
        assert_eq!(decrypt_streaming(&blob, &KEY).unwrap(), data);
    }

    #[test]
    fn swapping_non_adjacent_chunks_is_an_ordering_violation() {
        let cipher = StreamingCipher::new(8, 0).unwrap();
        let data: Vec<u8> = (0..40u8).collect();
        let mut blob = cipher.encrypt_streaming(&data, &KEY).unwrap();
        let ranges = chunk_ranges(&blob);
        assert_eq!(ranges.len(), 5);

        let one = blob[ranges[1].clone()].to_vec();
        let three = blob[ranges[3].clone()].to_vec();
        blob[ranges[1].clone()].copy_from_slice(&three);
        blob[ranges[3].clone()].copy_from_slice(&one);

        assert!(matches!(
            decrypt_streaming(&blob, &KEY),
            Err(VaultKeepError::ChunkOrderingViolation { index: 1 })
        ));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(StreamingCipher::new(0, 10).is_err());
    }
}
