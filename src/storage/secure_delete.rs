//! Overwrite-then-remove helpers.
//!
//! **Limitation:** this is a best-effort mitigation only.  Flash storage,
//! journaling filesystems and copy-on-write snapshots may keep older
//! copies of the bytes that are overwritten here; nothing in this module
//! guarantees that data cannot be recovered with hardware-level forensic
//! tools.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;

use crate::errors::Result;

/// Write size used while overwriting.
const WIPE_BLOCK: usize = 64 * 1024;

/// Overwrite exactly `length` bytes at `offset` with random data.
///
/// Bytes outside `offset..offset + length` are left untouched.  The
/// region must lie inside the current file length.
pub fn overwrite_region(file: &mut File, offset: u64, length: u64) -> Result<()> {
    let file_len = file.metadata()?.len();
    let end = offset.checked_add(length).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "overwrite region overflows u64")
    })?;
    if end > file_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("overwrite region {offset}..{end} exceeds file length {file_len}"),
        )
        .into());
    }
    if length == 0 {
        return Ok(());
    }

    file.seek(SeekFrom::Start(offset))?;

    let mut block = vec![0u8; WIPE_BLOCK.min(usize::try_from(length).unwrap_or(WIPE_BLOCK))];
    let mut remaining = length;
    while remaining > 0 {
        let n = usize::try_from(remaining).map_or(block.len(), |r| r.min(block.len()));
        rand::rngs::OsRng.fill_bytes(&mut block[..n]);
        file.write_all(&block[..n])?;
        remaining -= n as u64;
    }

    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Overwrite a whole file with random data, then remove it.
///
/// A missing file is not an error.
pub fn delete_file(path: &Path) -> Result<()> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    overwrite_region(&mut file, 0, len)?;
    drop(file);

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    tracing::debug!("securely deleted {} ({len} bytes)", path.display());
    Ok(())
}
