//! Per-vault catalog types.
//!
//! A `VaultIndex` is what one `VaultKey` unlocks: a version counter, the
//! sealed master key, and one `FileEntry` per stored file.  The whole
//! index is serialized as JSON and sealed under a key derived from the
//! `VaultKey` before it goes into the footer.  Byte fields serialize as
//! base64 strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::crypto::encryption::{self, KEY_LEN};
use crate::crypto::keys::{hkdf_derive, MasterKey, VaultKey};
pub use crate::crypto::streaming::PayloadEncoding;
use crate::errors::{Result, VaultKeepError};
use crate::storage::footer::{base64_decode, base64_encode};
use crate::storage::BlobRef;

/// An encrypted payload inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub offset: u64,
    pub length: u64,
    pub encoding: PayloadEncoding,
}

impl StoredBlob {
    pub fn new(blob: BlobRef, encoding: PayloadEncoding) -> Self {
        Self {
            offset: blob.offset,
            length: blob.length,
            encoding,
        }
    }

    pub fn blob_ref(&self) -> BlobRef {
        BlobRef {
            offset: self.offset,
            length: self.length,
        }
    }
}

/// One stored file.  `filename` and `mime_type` are sealed under the
/// vault's metadata key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub payload: StoredBlob,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub filename: Vec<u8>,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub mime_type: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<StoredBlob>,

    /// Plaintext size in bytes.
    pub size: u64,

    pub created_at: DateTime<Utc>,
}

impl FileEntry {
    /// Every extent this entry occupies.
    pub fn extents(&self) -> impl Iterator<Item = BlobRef> + '_ {
        std::iter::once(self.payload.blob_ref()).chain(self.thumbnail.iter().map(StoredBlob::blob_ref))
    }
}

/// Decrypted header of one file, returned by retrieve and list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Lightweight listing entry: header plus decrypted thumbnail bytes.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub header: FileHeader,
    pub thumbnail: Option<Vec<u8>>,
}

/// One vault's catalog.
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultIndex {
    /// Bumped by every successful save.
    pub version: u64,

    /// The vault master key, sealed under the `VaultKey`.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    master_envelope: Vec<u8>,

    /// fileId -> entry.
    pub files: BTreeMap<String, FileEntry>,
}

impl VaultIndex {
    /// A fresh, unsaved index (version 0) with a new random master key.
    pub fn empty(key: &VaultKey) -> Result<Self> {
        let master = MasterKey::generate();
        Ok(Self {
            version: 0,
            master_envelope: master.seal(key)?,
            files: BTreeMap::new(),
        })
    }

    /// Open the vault master key with the `VaultKey`.
    pub fn master_key(&self, key: &VaultKey) -> Result<MasterKey> {
        MasterKey::open(&self.master_envelope, key)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&FileEntry> {
        self.files.get(id)
    }

    /// Add an entry under a freshly generated id and return the id.
    ///
    /// Rejects entries whose extents overlap any live entry.
    pub fn insert(&mut self, entry: FileEntry) -> Result<String> {
        for existing in self.files.values() {
            for live in existing.extents() {
                if entry.extents().any(|new| new.overlaps(&live)) {
                    return Err(VaultKeepError::InvalidFormat(format!(
                        "extent {}..{} overlaps a live file",
                        live.offset,
                        live.end()
                    )));
                }
            }
        }

        let mut id = Uuid::new_v4().to_string();
        while self.files.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        self.files.insert(id.clone(), entry);
        Ok(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<FileEntry> {
        self.files.remove(id)
    }

    /// Serialize and seal under the index key derived from `key`.
    pub fn seal(&self, key: &VaultKey) -> Result<Vec<u8>> {
        let mut json = serde_json::to_vec(self)
            .map_err(|e| VaultKeepError::Serialization(format!("index: {e}")))?;
        let mut index_key = index_key(key)?;
        let sealed = encryption::encrypt(&index_key, &json);
        index_key.zeroize();
        json.zeroize();
        sealed
    }

    /// Open an index sealed by `seal`.
    pub fn open(sealed: &[u8], key: &VaultKey) -> Result<Self> {
        let mut index_key = index_key(key)?;
        let opened = encryption::decrypt(&index_key, sealed);
        index_key.zeroize();
        let mut json = opened?;

        let parsed = serde_json::from_slice(&json)
            .map_err(|e| VaultKeepError::InvalidFormat(format!("index JSON: {e}")));
        json.zeroize();
        parsed
    }
}

fn index_key(key: &VaultKey) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(key.as_bytes(), b"vaultkeep-index")
}
