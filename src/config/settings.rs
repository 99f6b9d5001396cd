use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::streaming::{StreamingCipher, DEFAULT_CHUNK_SIZE, DEFAULT_STREAMING_THRESHOLD};
use crate::errors::{Result, VaultKeepError};

/// Project-level configuration, loaded from `.vaultkeep.toml`.
///
/// Every field has a sensible default so VaultKeep works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory (relative to the project root) holding the container.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: String,

    /// Container file name inside `vault_dir`.
    #[serde(default = "default_container_file")]
    pub container_file: String,

    /// Device secret file name inside `vault_dir`.
    #[serde(default = "default_device_key_file")]
    pub device_key_file: String,

    /// Payloads larger than this many bytes are streamed (default: 1 MiB).
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold: u64,

    /// Plaintext bytes per streaming chunk (default: 256 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Space reserved when the container is created, and the step it
    /// grows by (default: 1 MiB).
    #[serde(default = "default_preallocate_bytes")]
    pub preallocate_bytes: u64,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_vault_dir() -> String {
    ".vaultkeep".to_string()
}

fn default_container_file() -> String {
    "vault.bin".to_string()
}

fn default_device_key_file() -> String {
    "device.key".to_string()
}

fn default_streaming_threshold() -> u64 {
    DEFAULT_STREAMING_THRESHOLD
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_preallocate_bytes() -> u64 {
    1024 * 1024
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_dir: default_vault_dir(),
            container_file: default_container_file(),
            device_key_file: default_device_key_file(),
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            preallocate_bytes: default_preallocate_bytes(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    const FILE_NAME: &'static str = ".vaultkeep.toml";

    /// Load settings from `<project_dir>/.vaultkeep.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultKeepError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(VaultKeepError::ConfigError(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.container_file.is_empty() || self.device_key_file.is_empty() {
            return Err(VaultKeepError::ConfigError(
                "container_file and device_key_file cannot be empty".into(),
            ));
        }
        if self.container_file == self.device_key_file {
            return Err(VaultKeepError::ConfigError(
                "container_file and device_key_file must differ".into(),
            ));
        }
        Ok(())
    }

    /// Full path of the vault directory.
    ///
    /// Example: `project_dir/.vaultkeep`
    pub fn vault_dir_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.vault_dir)
    }

    /// Container file inside `vault_dir`.
    pub fn container_path(&self, vault_dir: &Path) -> PathBuf {
        vault_dir.join(&self.container_file)
    }

    /// Device key file inside `vault_dir`.
    pub fn device_key_path(&self, vault_dir: &Path) -> PathBuf {
        vault_dir.join(&self.device_key_file)
    }

    /// Build the payload cipher from the chunking settings.
    pub fn streaming_cipher(&self) -> Result<StreamingCipher> {
        StreamingCipher::new(self.chunk_size, self.streaming_threshold)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
