//! Keyfile-backed key provider.
//!
//! Deriving a vault key from a pattern or passphrase happens outside this
//! crate.  The core only consumes a `KeyProvider`, which either yields a
//! `VaultKey` or fails.  The bundled provider reads a 32-byte random file,
//! which is also how the CLI selects a vault: one keyfile per vault.

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use zeroize::Zeroizing;

use super::encryption::KEY_LEN;
use super::keys::VaultKey;
use crate::errors::{Result, VaultKeepError};

/// Source of the secret that unlocks one vault.
pub trait KeyProvider {
    fn vault_key(&self) -> Result<VaultKey>;
}

/// Write `bytes` to `path` with owner-only permissions, refusing to
/// overwrite an existing file.
pub(crate) fn write_secret_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        return Err(VaultKeepError::KeyfileError(format!(
            "refusing to overwrite existing key material at {}",
            path.display()
        )));
    }

    // Ensure the parent directory exists.
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                VaultKeepError::KeyfileError(format!("cannot create key directory: {e}"))
            })?;
        }
    }

    fs::write(path, bytes)
        .map_err(|e| VaultKeepError::KeyfileError(format!("failed to write key file: {e}")))?;

    // On Unix, restrict permissions to owner-only read/write.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms).map_err(|e| {
            VaultKeepError::KeyfileError(format!("failed to set key file permissions: {e}"))
        })?;
    }

    Ok(())
}

/// Read a 32-byte secret file.
pub(crate) fn read_secret_file(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    if !path.exists() {
        return Err(VaultKeepError::KeyfileError(format!(
            "key file not found at {}",
            path.display()
        )));
    }

    let data = Zeroizing::new(
        fs::read(path)
            .map_err(|e| VaultKeepError::KeyfileError(format!("failed to read key file: {e}")))?,
    );

    if data.len() != KEY_LEN {
        return Err(VaultKeepError::KeyfileError(format!(
            "key file must be exactly {} bytes, got {}",
            KEY_LEN,
            data.len()
        )));
    }

    Ok(data)
}

/// Generate a new random keyfile at `path` and return its key.
pub fn generate_keyfile(path: &Path) -> Result<VaultKey> {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    write_secret_file(path, &bytes[..])?;
    Ok(VaultKey::new(*bytes))
}

/// Load a keyfile from disk and validate its length.
pub fn load_keyfile(path: &Path) -> Result<VaultKey> {
    let data = read_secret_file(path)?;
    VaultKey::from_slice(&data)
}

/// `KeyProvider` that reads a keyfile on every request.
#[derive(Debug, Clone)]
pub struct KeyfileProvider {
    path: PathBuf,
}

impl KeyfileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyProvider for KeyfileProvider {
    fn vault_key(&self) -> Result<VaultKey> {
        load_keyfile(&self.path)
    }
}

/// A key held in memory, for callers that derived it themselves.
impl KeyProvider for VaultKey {
    fn vault_key(&self) -> Result<VaultKey> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generate_and_load_keyfile_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.key");

        let generated = generate_keyfile(&path).unwrap();
        let loaded = load_keyfile(&path).unwrap();
        assert_eq!(generated, loaded);
    }

    #[test]
    fn generate_keyfile_fails_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.key");

        generate_keyfile(&path).unwrap();
        assert!(generate_keyfile(&path).is_err());
    }

    #[test]
    fn load_keyfile_fails_if_missing() {
        let dir = TempDir::new().unwrap();
        let result = load_keyfile(&dir.path().join("missing.key"));
        assert!(matches!(result, Err(VaultKeepError::KeyfileError(_))));
    }

    #[test]
    fn load_keyfile_fails_on_wrong_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, [0u8; 16]).unwrap();

        assert!(load_keyfile(&path).is_err());
    }

    #[test]
    fn provider_reads_the_same_key_each_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vault.key");
        let generated = generate_keyfile(&path).unwrap();

        let provider = KeyfileProvider::new(&path);
        assert_eq!(provider.vault_key().unwrap(), generated);
        assert_eq!(provider.vault_key().unwrap(), generated);
    }

    #[cfg(unix)]
    #[test]
    fn keyfile_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.key");
        generate_keyfile(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
