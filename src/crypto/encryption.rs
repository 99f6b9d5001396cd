//! AES-256-GCM single-shot authenticated encryption.
//!
//! Each call to `encrypt` generates a fresh random 12-byte nonce and
//! prepends it to the ciphertext.  `decrypt` splits the nonce back out
//! before decrypting.
//!
//! Layout of the returned byte buffer:
//!   [ 12-byte nonce | ciphertext | 16-byte auth tag ]
//!
//! The overhead is always `OVERHEAD` (28) bytes, even for an empty
//! plaintext.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use crate::errors::{Result, VaultKeepError};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the AES-256-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Required key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Fixed per-message overhead of the single-shot format.
pub const OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Build the cipher, rejecting keys that are not exactly 32 bytes.
pub(crate) fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(VaultKeepError::InvalidKeySize(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| VaultKeepError::InvalidKeySize(key.len()))
}

/// Encrypt `plaintext` with a 32-byte `key`.
///
/// Returns `nonce || ciphertext || tag`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    // Generate a random 12-byte nonce.
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| VaultKeepError::EncryptionFailed(format!("encryption error: {e}")))?;

    // Prepend the nonce so the caller only needs to store one blob.
    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data that was produced by `encrypt`.
///
/// Any tag mismatch, and any blob too short to hold a nonce and a tag,
/// fails with `AuthenticationFailure`.
pub fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if blob.len() < OVERHEAD {
        return Err(VaultKeepError::AuthenticationFailure);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| VaultKeepError::AuthenticationFailure)
}

/// Encrypt one chunk under an explicit nonce, binding `aad`.
///
/// Output is `ciphertext || tag` (no nonce prefix).
pub(crate) fn seal_with_nonce(
    cipher: &Aes256Gcm,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| VaultKeepError::EncryptionFailed(format!("chunk encryption error: {e}")))
}

/// Open one chunk sealed by `seal_with_nonce`. Returns `None` on any
/// authentication failure so the caller can attribute it.
pub(crate) fn open_with_nonce(
    cipher: &Aes256Gcm,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Option<Vec<u8>> {
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overhead_is_fixed_for_empty_plaintext() {
        let key = [0x01u8; KEY_LEN];
        let blob = encrypt(&key, b"").unwrap();
        assert_eq!(blob.len(), OVERHEAD);
        assert!(decrypt(&key, &blob).unwrap().is_empty());
    }

    #[test]
    fn short_key_is_rejected() {
        let result = encrypt(&[0u8; 16], b"data");
        assert!(matches!(result, Err(VaultKeepError::InvalidKeySize(16))));

        let result = decrypt(&[0u8; 31], &[0u8; 64]);
        assert!(matches!(result, Err(VaultKeepError::InvalidKeySize(31))));
    }

    #[test]
    fn truncated_blob_is_an_authentication_failure() {
        let key = [0x02u8; KEY_LEN];
        let result = decrypt(&key, &[0u8; OVERHEAD - 1]);
        assert!(matches!(result, Err(VaultKeepError::AuthenticationFailure)));
    }

    #[test]
    fn flipped_tag_bit_is_detected() {
        let key = [0x03u8; KEY_LEN];
        let mut blob = encrypt(&key, b"photo bytes").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &blob),
            Err(VaultKeepError::AuthenticationFailure)
        ));
    }
}
