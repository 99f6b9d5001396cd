//! Device-bound secret used to hide the container footer.
//!
//! On a phone this secret would live in a hardware-backed key store; that
//! store is outside this crate.  The core only needs a
//! `DeviceSecretProvider`, from which it derives:
//!
//! - a 16-byte **mask** XOR-ed over the footer pointer in the container
//!   header, and
//! - a 32-byte **footer key** that seals the footer table, so the number
//!   of vaults and their fingerprints never appear in the raw file.

use std::path::{Path, PathBuf};

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use super::encryption::KEY_LEN;
use super::keyfile::{read_secret_file, write_secret_file};
use super::keys::hkdf_derive;
use crate::errors::Result;

/// Length of the footer pointer mask.
pub const MASK_LEN: usize = 16;

/// Source of the device-bound secret.
pub trait DeviceSecretProvider: Send + Sync {
    fn device_secret(&self) -> Result<Zeroizing<[u8; KEY_LEN]>>;
}

/// Sub-keys derived from the device secret.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct FooterKeys {
    mask: [u8; MASK_LEN],
    seal_key: [u8; KEY_LEN],
}

impl FooterKeys {
    /// Derive the mask and sealing key from a device secret.
    pub fn derive(device_secret: &[u8]) -> Result<Self> {
        Ok(Self {
            mask: hkdf_derive(device_secret, b"vaultkeep-footer-mask")?,
            seal_key: hkdf_derive(device_secret, b"vaultkeep-footer-key")?,
        })
    }

    /// Ask `provider` for the device secret and derive from it.
    pub fn from_provider(provider: &dyn DeviceSecretProvider) -> Result<Self> {
        let secret = provider.device_secret()?;
        Self::derive(&secret[..])
    }

    pub fn mask(&self) -> &[u8; MASK_LEN] {
        &self.mask
    }

    pub fn seal_key(&self) -> &[u8; KEY_LEN] {
        &self.seal_key
    }

    /// XOR a 16-byte pointer with the mask.  Applying it twice is the
    /// identity.
    pub fn apply_mask(&self, pointer: &[u8; MASK_LEN]) -> [u8; MASK_LEN] {
        let mut out = *pointer;
        for (b, m) in out.iter_mut().zip(self.mask.iter()) {
            *b ^= m;
        }
        out
    }
}

/// Device secret stored in a local 32-byte file, created on first use.
#[derive(Debug, Clone)]
pub struct DeviceKeyFile {
    path: PathBuf,
}

impl DeviceKeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceSecretProvider for DeviceKeyFile {
    fn device_secret(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);

        if self.path.exists() {
            let data = read_secret_file(&self.path)?;
            secret.copy_from_slice(&data);
        } else {
            rand::rngs::OsRng.fill_bytes(&mut secret[..]);
            write_secret_file(&self.path, &secret[..])?;
            tracing::info!("created device key at {}", self.path.display());
        }

        Ok(secret)
    }
}

/// Fixed in-memory device secret, for embedding and tests.
pub struct StaticDeviceSecret(Zeroizing<[u8; KEY_LEN]>);

impl StaticDeviceSecret {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl DeviceSecretProvider for StaticDeviceSecret {
    fn device_secret(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        Ok(self.0.clone())
    }
}
