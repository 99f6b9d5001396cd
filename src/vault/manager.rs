//! Loads and saves per-vault indexes in the container footer.
//!
//! All vaults share one footer, kept in one of two reserved slots.  A save
//! never edits the published footer in place: the new table is written to
//! the inactive slot and synced, then the 16-byte pointer in the header is
//! switched over, and only then is the old footer overwritten.  The slots
//! are reused on every save and only replaced by a larger pair when the
//! table outgrows them.  Readers work from the in-memory copy of the
//! published table, so they never see a half-written state.
//!
//! Load and save for one key run under a reentrant lock scoped to that
//! key's fingerprint.  A caller holding it (see `with_key_lock`) can load,
//! modify and save without deadlocking; other keys take other locks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use super::index::VaultIndex;
use crate::crypto::device::FooterKeys;
use crate::crypto::keys::{Fingerprint, VaultKey};
use crate::errors::{Result, VaultKeepError};
use crate::storage::footer::{
    self, FooterLayout, FooterTable, HEADER_LEN, INITIAL_SLOT_LEN, POINTER_OFFSET,
};
use crate::storage::{BlobRef, BlobStore};

struct FooterState {
    table: FooterTable,
    layout: FooterLayout,
    location: BlobRef,
}

/// Owner of every vault's catalog inside one container.
pub struct IndexManager {
    blobs: Arc<BlobStore>,
    keys: FooterKeys,
    footer: RwLock<FooterState>,
    key_locks: Mutex<HashMap<Fingerprint, Arc<ReentrantMutex<()>>>>,
}

impl IndexManager {
    /// Open the container at `path`, creating it if it does not exist.
    pub fn open_or_create(path: &Path, keys: FooterKeys, preallocate: u64) -> Result<Self> {
        if path.exists() {
            Self::open(path, keys, preallocate)
        } else {
            Self::create(path, keys, preallocate)
        }
    }

    /// Create a new container holding an empty footer.
    pub fn create(path: &Path, keys: FooterKeys, preallocate: u64) -> Result<Self> {
        let blobs = Arc::new(BlobStore::create(path, HEADER_LEN, preallocate)?);

        let slots = [
            blobs.reserve(INITIAL_SLOT_LEN)?,
            blobs.reserve(INITIAL_SLOT_LEN)?,
        ];
        let layout = FooterLayout {
            slots,
            cursor: blobs.cursor(),
        };

        let table = FooterTable::default();
        let sealed = table.seal(&layout, &keys)?;
        let location = BlobRef {
            offset: slots[0].offset,
            length: sealed.len() as u64,
        };
        blobs.write_at(location.offset, &sealed)?;
        blobs.sync()?;
        let header = footer::build_header(&keys.apply_mask(&footer::encode_pointer(location)));
        blobs.write_at(0, &header)?;
        blobs.sync()?;

        tracing::info!("created container at {}", path.display());
        Ok(Self::from_parts(blobs, keys, table, layout, location))
    }

    /// Open an existing container.
    ///
    /// Fails with `FooterUnreadable` when the device secret does not match
    /// the one the container was created with.
    pub fn open(path: &Path, keys: FooterKeys, preallocate: u64) -> Result<Self> {
        let blobs = Arc::new(BlobStore::open(path, HEADER_LEN, preallocate)?);

        let header = blobs.read_at(0, HEADER_LEN)?;
        let masked = footer::parse_header(&header)?;
        let location = footer::decode_pointer(&keys.apply_mask(&masked));

        // A wrong mask yields a pointer outside the file.
        let in_bounds = location.offset >= HEADER_LEN
            && location
                .offset
                .checked_add(location.length)
                .is_some_and(|end| end <= blobs.capacity());
        if !in_bounds {
            return Err(VaultKeepError::FooterUnreadable);
        }

        let sealed = blobs.read_at(location.offset, location.length)?;
        let (table, layout) = FooterTable::open(&sealed, &keys)?;
        if !layout.holds(location) {
            return Err(VaultKeepError::InvalidFormat(
                "footer pointer does not match its slots".into(),
            ));
        }

        // Nothing published lies past the recorded cursor or the slots.
        let slots_end = layout.slots.iter().map(BlobRef::end).max().unwrap_or(HEADER_LEN);
        blobs.restore_cursor(layout.cursor.max(slots_end));

        tracing::debug!("opened container at {}", path.display());
        Ok(Self::from_parts(blobs, keys, table, layout, location))
    }

    fn from_parts(
        blobs: Arc<BlobStore>,
        keys: FooterKeys,
        table: FooterTable,
        layout: FooterLayout,
        location: BlobRef,
    ) -> Self {
        Self {
            blobs,
            keys,
            footer: RwLock::new(FooterState {
                table,
                layout,
                location,
            }),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The blob region shared with the facade.
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    fn key_lock(&self, fingerprint: Fingerprint) -> Arc<ReentrantMutex<()>> {
        self.key_locks
            .lock()
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    /// Run `f` while holding the exclusive, reentrant lock for `key`.
    ///
    /// `load_index`, `save_index` and `delete_vault_index` take the same
    /// lock, so they may be called from inside `f`.
    pub fn with_key_lock<T>(&self, key: &VaultKey, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.key_lock(key.fingerprint());
        let _guard = lock.lock();
        f()
    }

    // ------------------------------------------------------------------
    // Index operations
    // ------------------------------------------------------------------

    /// Load the index for `key`.
    ///
    /// An unknown fingerprint, or a record this key cannot open, both give
    /// a fresh empty index.  The two cases are indistinguishable to the
    /// caller.
    pub fn load_index(&self, key: &VaultKey) -> Result<VaultIndex> {
        self.with_key_lock(key, || match self.stored_index(key) {
            Some(index) => Ok(index),
            None => VaultIndex::empty(key),
        })
    }

    /// Returns `true` if a record for this key's fingerprint exists and
    /// opens with this key.
    pub fn has_index(&self, key: &VaultKey) -> bool {
        self.with_key_lock(key, || Ok(self.stored_index(key).is_some()))
            .unwrap_or(false)
    }

    fn stored_index(&self, key: &VaultKey) -> Option<VaultIndex> {
        let fingerprint = key.fingerprint().to_hex();
        let sealed = self.footer.read().table.records.get(&fingerprint).cloned()?;
        match VaultIndex::open(&sealed, key) {
            Ok(index) => Some(index),
            Err(_) => {
                tracing::trace!("record for {fingerprint} does not open with this key");
                None
            }
        }
    }

    /// Persist `index` for `key` and bump its version.
    ///
    /// The stored version must equal `index.version`; otherwise someone
    /// saved in between and `VersionConflict` is returned rather than
    /// overwriting their update.  Returns the new version.
    pub fn save_index(&self, index: &mut VaultIndex, key: &VaultKey) -> Result<u64> {
        self.with_key_lock(key, || {
            let stored = self.stored_index(key).map_or(0, |i| i.version);
            if stored != index.version {
                return Err(VaultKeepError::VersionConflict {
                    expected: index.version,
                    found: stored,
                });
            }

            let mut next = index.clone();
            next.version += 1;
            let sealed = next.seal(key)?;

            let old = {
                let mut state = self.footer.write();
                let mut table = state.table.clone();
                table.records.insert(key.fingerprint().to_hex(), sealed);
                self.publish(&mut state, table)?
            };

            if let Err(e) = self.blobs.shred(old) {
                tracing::warn!("could not overwrite superseded footer: {e}");
            }

            index.version = next.version;
            tracing::debug!("saved index version {}", index.version);
            Ok(index.version)
        })
    }

    /// Destroy the index for `key` only.  Other vaults are untouched.
    ///
    /// The footer that still held the record is overwritten with random
    /// bytes.  A missing record is not an error.
    ///
    /// Unlike `save_index`, a failed overwrite is returned as an error:
    /// the superseded footer is the last copy of the destroyed catalog.
    /// The record is already gone from the published footer by then, so
    /// the vault reads as empty even when this returns `Err`.
    pub fn delete_vault_index(&self, key: &VaultKey) -> Result<()> {
        self.with_key_lock(key, || {
            let fingerprint = key.fingerprint().to_hex();

            let old = {
                let mut state = self.footer.write();
                if !state.table.records.contains_key(&fingerprint) {
                    return Ok(());
                }
                let mut table = state.table.clone();
                table.records.remove(&fingerprint);
                self.publish(&mut state, table)?
            };

            self.blobs.shred(old)?;
            tracing::info!("vault index destroyed");
            Ok(())
        })
    }

    /// Write `table` into the inactive slot and switch the header pointer
    /// to it.  Returns the location of the superseded footer.
    fn publish(&self, state: &mut FooterState, table: FooterTable) -> Result<BlobRef> {
        let mut layout = FooterLayout {
            cursor: self.blobs.cursor(),
            ..state.layout
        };
        let mut sealed = table.seal(&layout, &self.keys)?;
        let mut target = layout.other_slot(state.location);
        let mut retired = None;

        if sealed.len() as u64 > layout.slot_len() {
            // Outgrown: move to a larger pair.  The old pair becomes dead
            // space once the old footer is shredded.
            let slot_len = (sealed.len() as u64).saturating_mul(2).max(INITIAL_SLOT_LEN);
            let slots = [self.blobs.reserve(slot_len)?, self.blobs.reserve(slot_len)?];
            layout = FooterLayout {
                slots,
                cursor: self.blobs.cursor(),
            };
            sealed = table.seal(&layout, &self.keys)?;
            target = slots[0];
            retired = Some(state.layout.other_slot(state.location));
            tracing::debug!("footer slots grown to {slot_len} bytes");
        }

        if sealed.len() as u64 > target.length {
            return Err(VaultKeepError::InvalidFormat(
                "footer does not fit its slot".into(),
            ));
        }

        let location = BlobRef {
            offset: target.offset,
            length: sealed.len() as u64,
        };
        self.blobs.write_at(location.offset, &sealed)?;
        self.blobs.sync()?;

        let masked = self.keys.apply_mask(&footer::encode_pointer(location));
        self.blobs.write_at(POINTER_OFFSET, &masked)?;
        self.blobs.sync()?;

        // The idle slot of the old pair still holds an older footer.
        if let Some(slot) = retired {
            if let Err(e) = self.blobs.shred(slot) {
                tracing::warn!("could not overwrite retired footer slot: {e}");
            }
        }

        state.table = table;
        state.layout = layout;
        Ok(std::mem::replace(&mut state.location, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys() -> FooterKeys {
        FooterKeys::derive(&[0x11u8; 32]).unwrap()
    }

    fn manager() -> (TempDir, IndexManager) {
        let dir = TempDir::new().unwrap();
        let m = IndexManager::create(&dir.path().join("vault.bin"), keys(), 4096).unwrap();
        (dir, m)
    }

    #[test]
    fn unseen_key_loads_empty_index() {
        let (_dir, m) = manager();
        let index = m.load_index(&VaultKey::generate()).unwrap();
        assert_eq!(index.version, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn save_increments_version_each_time() {
        let (_dir, m) = manager();
        let key = VaultKey::generate();

        let mut index = m.load_index(&key).unwrap();
        assert_eq!(m.save_index(&mut index, &key).unwrap(), 1);
        assert_eq!(m.save_index(&mut index, &key).unwrap(), 2);
        assert_eq!(m.load_index(&key).unwrap().version, 2);
    }

    #[test]
    fn stale_save_is_a_version_conflict() {
        let (_dir, m) = manager();
        let key = VaultKey::generate();

        let mut a = m.load_index(&key).unwrap();
        let mut b = m.load_index(&key).unwrap();
        m.save_index(&mut a, &key).unwrap();

        match m.save_index(&mut b, &key) {
            Err(VaultKeepError::VersionConflict { expected, found }) => {
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("expected VersionConflict, got {:?}", other.map(|_| ())),
        }
        assert_eq!(m.load_index(&key).unwrap().version, 1);
    }

    #[test]
    fn key_lock_is_reentrant() {
        let (_dir, m) = manager();
        let key = VaultKey::generate();

        let version = m
            .with_key_lock(&key, || {
                let mut index = m.load_index(&key)?;
                m.with_key_lock(&key, || m.save_index(&mut index, &key))
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn delete_removes_only_that_vault() {
        let (_dir, m) = manager();
        let k1 = VaultKey::generate();
        let k2 = VaultKey::generate();

        m.save_index(&mut m.load_index(&k1).unwrap(), &k1).unwrap();
        m.save_index(&mut m.load_index(&k2).unwrap(), &k2).unwrap();

        m.delete_vault_index(&k1).unwrap();
        assert!(!m.has_index(&k1));
        assert!(m.has_index(&k2));
        assert_eq!(m.load_index(&k2).unwrap().version, 1);
    }

    #[test]
    fn delete_of_unknown_vault_is_a_noop() {
        let (_dir, m) = manager();
        assert!(m.delete_vault_index(&VaultKey::generate()).is_ok());
    }

    #[test]
    fn reopen_restores_every_vault() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.bin");
        let k1 = VaultKey::generate();
        let k2 = VaultKey::generate();

        {
            let m = IndexManager::create(&path, keys(), 1024).unwrap();
            m.save_index(&mut m.load_index(&k1).unwrap(), &k1).unwrap();
            let mut i2 = m.load_index(&k2).unwrap();
            m.save_index(&mut i2, &k2).unwrap();
            m.save_index(&mut i2, &k2).unwrap();
        }

        let m = IndexManager::open(&path, keys(), 1024).unwrap();
        assert_eq!(m.load_index(&k1).unwrap().version, 1);
        assert_eq!(m.load_index(&k2).unwrap().version, 2);
    }

    #[test]
    fn other_device_cannot_open_container() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.bin");
        IndexManager::create(&path, keys(), 1024).unwrap();

        let other = FooterKeys::derive(&[0x22u8; 32]).unwrap();
        assert!(matches!(
            IndexManager::open(&path, other, 1024),
            Err(VaultKeepError::FooterUnreadable)
        ));
    }

    #[test]
    fn repeated_saves_reuse_the_footer_slots() {
        let (_dir, m) = manager();
        let key = VaultKey::generate();
        let mut index = m.load_index(&key).unwrap();
        m.save_index(&mut index, &key).unwrap();

        let cursor = m.blobs().cursor();
        let capacity = m.blobs().capacity();
        for _ in 0..200 {
            m.save_index(&mut index, &key).unwrap();
        }

        assert_eq!(index.version, 201);
        assert_eq!(m.blobs().cursor(), cursor);
        assert_eq!(m.blobs().capacity(), capacity);
        assert_eq!(
            std::fs::metadata(m.blobs().path()).unwrap().len(),
            capacity
        );
    }

    #[test]
    fn saves_alternate_between_the_two_slots() {
        let (_dir, m) = manager();
        let key = VaultKey::generate();
        let mut index = m.load_index(&key).unwrap();

        let first = m.footer.read().location.offset;
        m.save_index(&mut index, &key).unwrap();
        let second = m.footer.read().location.offset;
        m.save_index(&mut index, &key).unwrap();
        let third = m.footer.read().location.offset;

        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn outgrown_footer_moves_to_larger_slots() {
        let (_dir, m) = manager();
        let before = m.footer.read().layout;

        // Enough vaults that the table no longer fits the initial slots.
        let keys: Vec<VaultKey> = (0..80).map(|_| VaultKey::generate()).collect();
        for key in &keys {
            m.save_index(&mut m.load_index(key).unwrap(), key).unwrap();
        }

        let after = m.footer.read().layout;
        assert!(after.slot_len() > before.slot_len());
        assert!(after.holds(m.footer.read().location));
        for key in &keys {
            assert_eq!(m.load_index(key).unwrap().version, 1);
        }
    }

    #[test]
    fn retired_footer_slots_hold_no_readable_footer() {
        let (_dir, m) = manager();
        let initial = m.footer.read().layout;

        // Track the two newest footers until the slots move.
        let mut previous = m.footer.read().location;
        let mut current = previous;
        for _ in 0..80 {
            let key = VaultKey::generate();
            m.save_index(&mut m.load_index(&key).unwrap(), &key).unwrap();
            if m.footer.read().layout.slots != initial.slots {
                break;
            }
            previous = current;
            current = m.footer.read().location;
        }
        assert_ne!(m.footer.read().layout.slots, initial.slots);

        for old in [previous, current] {
            let stale = m.blobs().read_at(old.offset, old.length).unwrap();
            assert!(FooterTable::open(&stale, &keys()).is_err());
        }
    }

    #[test]
    fn reopen_after_growth_keeps_appends_past_the_slots() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.bin");
        let keys_list: Vec<VaultKey> = (0..80).map(|_| VaultKey::generate()).collect();

        let cursor = {
            let m = IndexManager::create(&path, keys(), 1024).unwrap();
            for key in &keys_list {
                m.save_index(&mut m.load_index(key).unwrap(), key).unwrap();
            }
            m.blobs().cursor()
        };

        let m = IndexManager::open(&path, keys(), 1024).unwrap();
        assert_eq!(m.blobs().cursor(), cursor);
        let blob = m.blobs().append(b"next payload").unwrap();
        let layout = m.footer.read().layout;
        assert!(layout.slots.iter().all(|slot| !slot.overlaps(&blob)));
        assert_eq!(m.load_index(&keys_list[0]).unwrap().version, 1);
    }

    #[test]
    fn deleted_vault_footer_is_overwritten() {
        let (_dir, m) = manager();
        let key = VaultKey::generate();
        m.save_index(&mut m.load_index(&key).unwrap(), &key).unwrap();

        let old = m.footer.read().location;
        m.delete_vault_index(&key).unwrap();

        let stale = m.blobs().read_at(old.offset, old.length).unwrap();
        assert!(FooterTable::open(&stale, &keys()).is_err());
        assert!(!m.has_index(&key));
    }
}
