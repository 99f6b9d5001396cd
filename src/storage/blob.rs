//! Append-only content region of the shared container file.
//!
//! Every vault's ciphertext lives in the same file, addressed by
//! `(offset, length)`.  The store only ever hands out space past its
//! cursor, so extents never overlap.  Space is pre-allocated and padded
//! with random bytes, so unused space looks exactly like ciphertext.
//! Deleting a file from an index leaves its bytes in place until a later
//! compaction pass.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::secure_delete;
use crate::errors::Result;

/// Location of one blob inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub offset: u64,
    pub length: u64,
}

impl BlobRef {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Returns `true` if the two extents share at least one byte.
    pub fn overlaps(&self, other: &BlobRef) -> bool {
        self.length > 0 && other.length > 0 && self.offset < other.end() && other.offset < self.end()
    }
}

struct BlobState {
    file: File,
    /// Next write position.
    cursor: u64,
    /// Current physical file length.
    capacity: u64,
}

/// The append-only blob region, safe to share across threads.
pub struct BlobStore {
    path: PathBuf,
    state: Mutex<BlobState>,
    grow_step: u64,
}

impl BlobStore {
    /// Create a new container file.
    ///
    /// The first `reserved` bytes are kept for the container header; the
    /// content region starts right after them and is pre-allocated to
    /// `preallocate` bytes of random filler.
    pub fn create(path: &Path, reserved: u64, preallocate: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let store = Self {
            path: path.to_path_buf(),
            state: Mutex::new(BlobState {
                file,
                cursor: reserved,
                capacity: 0,
            }),
            grow_step: preallocate.max(1),
        };

        {
            let mut state = store.state.lock();
            let target = reserved + preallocate;
            fill_random(&mut state.file, 0, target)?;
            state.capacity = target;
            state.file.sync_all()?;
        }

        tracing::debug!(
            "created container {} with {preallocate} bytes pre-allocated",
            path.display()
        );
        Ok(store)
    }

    /// Open an existing container file.
    ///
    /// The cursor starts at `reserved`; the index layer moves it past the
    /// last published extent with `restore_cursor`.
    pub fn open(path: &Path, reserved: u64, preallocate: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(BlobState {
                file,
                cursor: reserved,
                capacity,
            }),
            grow_step: preallocate.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next write position.
    pub fn cursor(&self) -> u64 {
        self.state.lock().cursor
    }

    /// Physical length of the container file.
    pub fn capacity(&self) -> u64 {
        self.state.lock().capacity
    }

    /// Move the cursor forward to `cursor`.  Never moves it backwards.
    pub(crate) fn restore_cursor(&self, cursor: u64) {
        let mut state = self.state.lock();
        state.cursor = state.cursor.max(cursor);
    }

    /// Append `bytes` at the cursor, growing the file if needed.
    pub fn append(&self, bytes: &[u8]) -> Result<BlobRef> {
        let mut state = self.state.lock();
        let blob = BlobRef {
            offset: state.cursor,
            length: bytes.len() as u64,
        };

        let end = blob.end();
        if end > state.capacity {
            // Grow in whole pre-allocation steps past the new end.
            let new_capacity = end.max(state.capacity + self.grow_step);
            write_all_at(&mut state.file, blob.offset, bytes)?;
            fill_random(&mut state.file, end, new_capacity - end)?;
            state.capacity = new_capacity;
            tracing::debug!("container grown to {new_capacity} bytes");
        } else {
            write_all_at(&mut state.file, blob.offset, bytes)?;
        }

        state.cursor = end;
        Ok(blob)
    }

    /// Claim `length` bytes at the cursor and fill them with random data.
    ///
    /// Used for space that is rewritten in place later, like the footer
    /// slots.
    pub fn reserve(&self, length: u64) -> Result<BlobRef> {
        let mut state = self.state.lock();
        let blob = BlobRef {
            offset: state.cursor,
            length,
        };

        let end = blob.end();
        if end > state.capacity {
            let new_capacity = end.max(state.capacity + self.grow_step);
            fill_random(&mut state.file, blob.offset, new_capacity - blob.offset)?;
            state.capacity = new_capacity;
        } else {
            fill_random(&mut state.file, blob.offset, length)?;
        }

        state.cursor = end;
        Ok(blob)
    }

    /// Read one blob.  Extents past the cursor are rejected.
    pub fn read(&self, blob: BlobRef) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if blob.end() > state.cursor {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "blob {}..{} lies past the write cursor {}",
                    blob.offset,
                    blob.end(),
                    state.cursor
                ),
            )
            .into());
        }
        read_exact_at(&mut state.file, blob.offset, blob.length)
    }

    /// Overwrite a blob's bytes with random data.  Best-effort, see
    /// `secure_delete`.
    pub fn shred(&self, blob: BlobRef) -> Result<()> {
        let mut state = self.state.lock();
        secure_delete::overwrite_region(&mut state.file, blob.offset, blob.length)
    }

    /// Raw read anywhere inside the physical file (header access).
    pub(crate) fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if offset.saturating_add(length) > state.capacity {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of container",
            )
            .into());
        }
        read_exact_at(&mut state.file, offset, length)
    }

    /// Raw in-place write (header access).
    pub(crate) fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        write_all_at(&mut state.file, offset, bytes)?;
        let end = offset + bytes.len() as u64;
        state.capacity = state.capacity.max(end);
        Ok(())
    }

    /// Flush file data to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_data()?;
        Ok(())
    }
}

fn write_all_at(file: &mut File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

fn read_exact_at(file: &mut File, offset: u64, length: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(length)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "blob too large to read"))?;
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write `length` random bytes at `offset`.
fn fill_random(file: &mut File, offset: u64, length: u64) -> io::Result<()> {
    const BLOCK: u64 = 64 * 1024;
    let mut block = vec![0u8; BLOCK.min(length) as usize];
    file.seek(SeekFrom::Start(offset))?;
    let mut remaining = length;
    while remaining > 0 {
        let n = remaining.min(BLOCK) as usize;
        rand::rngs::OsRng.fill_bytes(&mut block[..n]);
        file.write_all(&block[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_store(prealloc: u64) -> (TempDir, BlobStore) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::create(&dir.path().join("c.bin"), 32, prealloc).unwrap();
        (dir, store)
    }

    #[test]
    fn create_preallocates_random_space() {
        let (_dir, store) = new_store(4096);
        assert_eq!(store.capacity(), 32 + 4096);
        assert_eq!(store.cursor(), 32);
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), 32 + 4096);
    }

    #[test]
    fn appends_are_sequential_and_disjoint() {
        let (_dir, store) = new_store(1024);
        let a = store.append(b"first blob").unwrap();
        let b = store.append(b"second").unwrap();

        assert_eq!(a.offset, 32);
        assert_eq!(b.offset, a.end());
        assert!(!a.overlaps(&b));
        assert_eq!(store.read(a).unwrap(), b"first blob");
        assert_eq!(store.read(b).unwrap(), b"second");
    }

    #[test]
    fn append_grows_past_preallocation() {
        let (_dir, store) = new_store(16);
        let big = vec![0x77u8; 100];
        let blob = store.append(&big).unwrap();

        assert!(store.capacity() >= blob.end());
        assert_eq!(store.read(blob).unwrap(), big);
    }

    #[test]
    fn read_past_cursor_is_rejected() {
        let (_dir, store) = new_store(1024);
        let blob = BlobRef {
            offset: 32,
            length: 10,
        };
        assert!(store.read(blob).is_err());
    }

    #[test]
    fn reopen_keeps_data_and_restored_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.bin");
        let blob = {
            let store = BlobStore::create(&path, 32, 256).unwrap();
            let blob = store.append(b"persisted").unwrap();
            store.sync().unwrap();
            blob
        };

        let store = BlobStore::open(&path, 32, 256).unwrap();
        store.restore_cursor(blob.end());
        assert_eq!(store.read(blob).unwrap(), b"persisted");

        let next = store.append(b"more").unwrap();
        assert_eq!(next.offset, blob.end());
    }

    #[test]
    fn shred_replaces_blob_bytes() {
        let (_dir, store) = new_store(1024);
        let blob = store.append(&[0u8; 64]).unwrap();
        store.shred(blob).unwrap();
        assert_ne!(store.read(blob).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn reserve_claims_space_without_overlap() {
        let (_dir, store) = new_store(64);
        let a = store.append(b"before").unwrap();
        let slot = store.reserve(200).unwrap();
        let b = store.append(b"after").unwrap();

        assert_eq!(slot.offset, a.end());
        assert_eq!(b.offset, slot.end());
        assert!(store.capacity() >= b.end());
        assert_eq!(store.read(a).unwrap(), b"before");
        assert_eq!(store.read(slot).unwrap().len(), 200);
    }

    #[test]
    fn overlap_detection() {
        let a = BlobRef { offset: 10, length: 10 };
        let b = BlobRef { offset: 19, length: 5 };
        let c = BlobRef { offset: 20, length: 5 };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
