//! High-level vault operations used by the CLI and embedders.
//!
//! `VaultStore` ties the blob region, the index manager and the streaming
//! cipher together so callers can work with simple calls like
//! `store.store_file(bytes, "scan.pdf", "application/pdf", &key, None)`.
//!
//! Every operation takes the `VaultKey` explicitly; the store itself never
//! remembers which vaults exist.  A key that matches no vault behaves like
//! a brand-new empty vault.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroize;

use super::index::{FileEntry, FileHeader, FileSummary, PayloadEncoding, StoredBlob, VaultIndex};
use super::manager::IndexManager;
use crate::config::Settings;
use crate::crypto::device::{DeviceKeyFile, DeviceSecretProvider, FooterKeys};
use crate::crypto::encryption::{self, KEY_LEN};
use crate::crypto::keys::{MasterKey, VaultKey};
use crate::crypto::streaming::{self, StagedPayload, StreamingCipher};
use crate::errors::{Result, VaultKeepError};
use crate::storage::{secure_delete, BlobStore};

/// The engine handle for one container file.  Share it behind an `Arc`
/// to use it from several threads.
pub struct VaultStore {
    /// Path to the container file on disk.
    path: PathBuf,

    /// Chunking configuration for payload encryption.
    cipher: StreamingCipher,

    /// The content region (shared with `indexes`).
    blobs: Arc<BlobStore>,

    /// Per-vault catalogs in the footer.
    indexes: IndexManager,
}

impl VaultStore {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Open (or create) the container at `path`.
    pub fn open(
        path: &Path,
        settings: &Settings,
        device: &dyn DeviceSecretProvider,
    ) -> Result<Self> {
        let cipher = settings.streaming_cipher()?;
        let keys = FooterKeys::from_provider(device)?;
        let indexes = IndexManager::open_or_create(path, keys, settings.preallocate_bytes)?;

        Ok(Self {
            path: path.to_path_buf(),
            cipher,
            blobs: Arc::clone(indexes.blobs()),
            indexes,
        })
    }

    /// Open the container inside `vault_dir`, using the device key file
    /// configured in `settings`.
    pub fn open_in(vault_dir: &Path, settings: &Settings) -> Result<Self> {
        std::fs::create_dir_all(vault_dir)?;
        let device = DeviceKeyFile::new(settings.device_key_path(vault_dir));
        Self::open(&settings.container_path(vault_dir), settings, &device)
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    /// Encrypt and store `data` in the vault unlocked by `key`.
    ///
    /// Returns the new file id.
    pub fn store_file(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
        key: &VaultKey,
        thumbnail: Option<&[u8]>,
    ) -> Result<String> {
        self.store_with(key, filename, mime_type, thumbnail, |cipher, master| {
            cipher.stage(data, master.as_bytes())
        })
    }

    /// Store a plaintext file from disk.
    ///
    /// With `shred_source`, the plaintext file is overwritten and removed
    /// once the encrypted copy is committed to the index.
    pub fn import_file(
        &self,
        source: &Path,
        mime_type: &str,
        key: &VaultKey,
        thumbnail: Option<&[u8]>,
        shred_source: bool,
    ) -> Result<String> {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                VaultKeepError::CommandFailed(format!("{} is not a file", source.display()))
            })?;

        let id = self.store_with(key, &filename, mime_type, thumbnail, |cipher, master| {
            cipher.encrypt_file_for_staging(source, master.as_bytes())
        })?;

        if shred_source {
            secure_delete::delete_file(source)?;
        }
        Ok(id)
    }

    fn store_with(
        &self,
        key: &VaultKey,
        filename: &str,
        mime_type: &str,
        thumbnail: Option<&[u8]>,
        seal_payload: impl FnOnce(&StreamingCipher, &MasterKey) -> Result<StagedPayload>,
    ) -> Result<String> {
        // The master key of a brand-new vault only exists once its first
        // index is saved, so everything happens under the key lock.
        self.indexes.with_key_lock(key, || {
            let mut index = self.indexes.load_index(key)?;
            let master = index.master_key(key)?;

            let staged = seal_payload(&self.cipher, &master)?;
            let size = staged.size;
            let payload = StoredBlob::new(self.blobs.append(&staged.sealed)?, staged.encoding);

            let thumbnail = match thumbnail {
                Some(bytes) => {
                    let staged = self.cipher.stage(bytes, master.as_bytes())?;
                    Some(StoredBlob::new(self.blobs.append(&staged.sealed)?, staged.encoding))
                }
                None => None,
            };

            let mut meta_key = master.metadata_key()?;
            let sealed_name = encryption::encrypt(&meta_key, filename.as_bytes());
            let sealed_mime = encryption::encrypt(&meta_key, mime_type.as_bytes());
            meta_key.zeroize();

            let entry = FileEntry {
                payload,
                filename: sealed_name?,
                mime_type: sealed_mime?,
                thumbnail,
                size,
                created_at: Utc::now(),
            };

            let id = index.insert(entry)?;
            self.indexes.save_index(&mut index, key)?;
            tracing::debug!("stored {size} bytes in {} file(s)", index.len());
            Ok(id)
        })
    }

    /// Decrypt one file.
    ///
    /// An id missing from the key's index is `FileNotFound`, which is also
    /// what a wrong key produces.
    pub fn retrieve_file(&self, id: &str, key: &VaultKey) -> Result<(FileHeader, Vec<u8>)> {
        let index = self.indexes.load_index(key)?;
        let entry = index
            .get(id)
            .ok_or_else(|| VaultKeepError::FileNotFound(id.to_string()))?;

        let master = index.master_key(key)?;
        let header = decrypt_header(id, entry, &master)?;
        let content = self.open_blob(&entry.payload, &master)?;

        Ok((header, content))
    }

    /// Headers and thumbnails of every file in the key's vault, oldest
    /// first.
    pub fn list_files(&self, key: &VaultKey) -> Result<Vec<FileSummary>> {
        let index = self.indexes.load_index(key)?;
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let master = index.master_key(key)?;
        let mut list = Vec::with_capacity(index.len());
        for (id, entry) in &index.files {
            let header = decrypt_header(id, entry, &master)?;
            let thumbnail = entry
                .thumbnail
                .as_ref()
                .map(|t| self.open_blob(t, &master))
                .transpose()?;
            list.push(FileSummary { header, thumbnail });
        }

        list.sort_by(|a, b| {
            a.header
                .created_at
                .cmp(&b.header.created_at)
                .then_with(|| a.header.filename.cmp(&b.header.filename))
        });
        Ok(list)
    }

    /// Remove a file from the key's index.  Its ciphertext stays in the
    /// container as unreachable garbage.  A missing id is not an error.
    pub fn delete_file(&self, id: &str, key: &VaultKey) -> Result<()> {
        self.indexes.with_key_lock(key, || {
            let mut index = self.indexes.load_index(key)?;
            if index.remove(id).is_none() {
                return Ok(());
            }
            self.indexes.save_index(&mut index, key)?;
            Ok(())
        })
    }

    /// Destroy the key's whole catalog.  Other vaults in the container are
    /// unaffected.
    ///
    /// An error from overwriting the old footer is still reported after
    /// the catalog has been unpublished; see
    /// `IndexManager::delete_vault_index`.
    pub fn delete_vault_index(&self, key: &VaultKey) -> Result<()> {
        self.indexes.delete_vault_index(key)
    }

    fn open_blob(&self, blob: &StoredBlob, master: &MasterKey) -> Result<Vec<u8>> {
        let sealed = self.blobs.read(blob.blob_ref())?;
        match blob.encoding {
            PayloadEncoding::SingleShot => encryption::decrypt(master.as_bytes(), &sealed),
            PayloadEncoding::Streaming => streaming::decrypt_streaming(&sealed, master.as_bytes()),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Returns the path to the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the payload cipher configuration.
    pub fn cipher(&self) -> &StreamingCipher {
        &self.cipher
    }

    /// Direct access to the index layer (version checks, explicit locks).
    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Load the raw index for `key`.
    pub fn load_index(&self, key: &VaultKey) -> Result<VaultIndex> {
        self.indexes.load_index(key)
    }
}

fn decrypt_header(id: &str, entry: &FileEntry, master: &MasterKey) -> Result<FileHeader> {
    let mut meta_key: [u8; KEY_LEN] = master.metadata_key()?;
    let filename = encryption::decrypt(&meta_key, &entry.filename);
    let mime_type = encryption::decrypt(&meta_key, &entry.mime_type);
    meta_key.zeroize();

    Ok(FileHeader {
        id: id.to_string(),
        filename: utf8(filename?, "filename")?,
        mime_type: utf8(mime_type?, "MIME type")?,
        size: entry.size,
        created_at: entry.created_at,
    })
}

fn utf8(bytes: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| VaultKeepError::InvalidFormat(format!("{what} is not valid UTF-8")))
}
