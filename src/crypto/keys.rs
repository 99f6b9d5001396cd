//! Vault keys, fingerprints, and HKDF-SHA256 sub-key derivation.
//!
//! A `VaultKey` is the caller-supplied 32-byte secret that selects and
//! unlocks one vault.  Its `Fingerprint` (first 8 bytes of SHA-256) is
//! the only thing the container ever uses to pick a footer record.
//!
//! Each vault also has its own random `MasterKey`, sealed under the
//! `VaultKey` inside the vault's index.  File payloads are encrypted with
//! the master key, never with the `VaultKey` directly.

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::encryption::{self, KEY_LEN};
use crate::errors::{Result, VaultKeepError};

/// Length of a fingerprint in raw bytes.
pub const FINGERPRINT_LEN: usize = 8;

// ---------------------------------------------------------------------------
// VaultKey
// ---------------------------------------------------------------------------

/// The opaque 32-byte secret that unlocks one vault.
///
/// Zeroed on drop.  Never persisted by this crate.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    /// Wrap an exact 32-byte array.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, failing with `InvalidKeySize` unless it
    /// is exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| VaultKeepError::InvalidKeySize(bytes.len()))?;
        Ok(Self { bytes })
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Non-secret slot selector for this key.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.bytes)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for VaultKey {}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// First 8 bytes of SHA-256(key).  Rendered as 16 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Fingerprint arbitrary key bytes.
    pub fn of(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// HKDF
// ---------------------------------------------------------------------------

/// Run HKDF-SHA256 expand over `ikm` with the given `info`.
///
/// The input material already has full entropy, so the extract step uses
/// the default zero salt.
pub fn hkdf_derive<const N: usize>(ikm: &[u8], info: &[u8]) -> Result<[u8; N]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)
        .map_err(|e| VaultKeepError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

// ---------------------------------------------------------------------------
// MasterKey
// ---------------------------------------------------------------------------

/// Per-vault random data key, zeroed on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Generate a new random master key for a fresh vault.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Seal this master key under the vault key (the index "envelope").
    pub fn seal(&self, vault_key: &VaultKey) -> Result<Vec<u8>> {
        encryption::encrypt(vault_key.as_bytes(), &self.bytes)
    }

    /// Open an envelope produced by `seal`.
    pub fn open(envelope: &[u8], vault_key: &VaultKey) -> Result<Self> {
        let mut plain = encryption::decrypt(vault_key.as_bytes(), envelope)?;
        let result = <[u8; KEY_LEN]>::try_from(plain.as_slice())
            .map(|bytes| Self { bytes })
            .map_err(|_| VaultKeepError::InvalidKeySize(plain.len()));
        plain.zeroize();
        result
    }

    /// Derive the key used to seal filenames and MIME types.
    pub fn metadata_key(&self) -> Result<[u8; KEY_LEN]> {
        hkdf_derive(&self.bytes, b"vaultkeep-metadata")
    }
}
