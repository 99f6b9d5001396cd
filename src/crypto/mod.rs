//! Cryptographic primitives for VaultKeep.
//!
//! This module provides:
//! - AES-256-GCM single-shot encryption and decryption (`encryption`)
//! - The chunked streaming container with positional nonces (`streaming`)
//! - Vault keys, fingerprints and HKDF sub-keys (`keys`)
//! - The keyfile key provider (`keyfile`)
//! - The device secret that hides the container footer (`device`)

pub mod device;
pub mod encryption;
pub mod keyfile;
pub mod keys;
pub mod streaming;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{encrypt, decrypt, VaultKey, ...};
pub use device::{DeviceKeyFile, DeviceSecretProvider, FooterKeys, StaticDeviceSecret};
pub use encryption::{decrypt, encrypt, KEY_LEN, OVERHEAD};
pub use keyfile::{generate_keyfile, load_keyfile, KeyProvider, KeyfileProvider};
pub use keys::{Fingerprint, MasterKey, VaultKey};
pub use streaming::{
    decrypt_any, decrypt_streaming, is_streaming_format, PayloadEncoding, StagedPayload,
    StreamingCipher,
};
