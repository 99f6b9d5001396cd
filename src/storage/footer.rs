//! Container header and footer table format.
//!
//! A container file has this layout:
//!
//! ```text
//! [VKC1: 4 bytes][version: 1 byte][random: 11 bytes][masked pointer: 16 bytes]
//! [content region ... footer ... content ... random filler]
//! ```
//!
//! - **Pointer**: `footer_offset (u64 BE) || footer_length (u64 BE)`,
//!   XOR-ed with the 16-byte device mask.  It always sits at offset 16.
//! - **Footer**: a single-shot AES-256-GCM blob under the device footer
//!   key.  Its plaintext is a JSON `FooterTable` that maps each
//!   fingerprint to that vault's sealed index, plus the `FooterLayout`:
//!   where the two footer slots are and where the next write goes.
//! - **Slots**: two equal regions reserved for the footer.  A save writes
//!   the inactive slot and then flips the pointer, so the footer reuses
//!   the same space instead of growing the container on every save.
//!
//! Without the device secret, neither the footer's position nor the
//! number of vaults can be read from the file.

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::blob::BlobRef;
use crate::crypto::device::{FooterKeys, MASK_LEN};
use crate::crypto::encryption;
use crate::errors::{Result, VaultKeepError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every container file.
pub const CONTAINER_MAGIC: &[u8; 4] = b"VKC1";

/// Current container format version.
pub const CONTAINER_VERSION: u8 = 1;

/// Size of the fixed header that precedes the content region.
pub const HEADER_LEN: u64 = 32;

/// Fixed offset of the masked footer pointer.
pub const POINTER_OFFSET: u64 = 16;

/// Size of each footer slot in a new container.
pub const INITIAL_SLOT_LEN: u64 = 16 * 1024;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Build a fresh header carrying `masked_pointer`.
pub fn build_header(masked_pointer: &[u8; MASK_LEN]) -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..4].copy_from_slice(CONTAINER_MAGIC);
    header[4] = CONTAINER_VERSION;
    rand::rngs::OsRng.fill_bytes(&mut header[5..16]);
    header[16..32].copy_from_slice(masked_pointer);
    header
}

/// Validate a header and return its masked pointer.
pub fn parse_header(header: &[u8]) -> Result<[u8; MASK_LEN]> {
    if header.len() < HEADER_LEN as usize {
        return Err(VaultKeepError::InvalidFormat(
            "container shorter than its header".into(),
        ));
    }
    if &header[0..4] != CONTAINER_MAGIC {
        return Err(VaultKeepError::InvalidFormat(
            "missing VKC1 magic bytes".into(),
        ));
    }
    let version = header[4];
    if version != CONTAINER_VERSION {
        return Err(VaultKeepError::InvalidFormat(format!(
            "unsupported container version {version}, expected {CONTAINER_VERSION}"
        )));
    }

    let mut masked = [0u8; MASK_LEN];
    masked.copy_from_slice(&header[16..32]);
    Ok(masked)
}

/// Encode a footer location as the 16-byte pointer plaintext.
pub fn encode_pointer(location: BlobRef) -> [u8; MASK_LEN] {
    let mut out = [0u8; MASK_LEN];
    out[0..8].copy_from_slice(&location.offset.to_be_bytes());
    out[8..16].copy_from_slice(&location.length.to_be_bytes());
    out
}

/// Decode the 16-byte pointer plaintext.
pub fn decode_pointer(pointer: &[u8; MASK_LEN]) -> BlobRef {
    let mut offset = [0u8; 8];
    let mut length = [0u8; 8];
    offset.copy_from_slice(&pointer[0..8]);
    length.copy_from_slice(&pointer[8..16]);
    BlobRef {
        offset: u64::from_be_bytes(offset),
        length: u64::from_be_bytes(length),
    }
}

// ---------------------------------------------------------------------------
// Footer table
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct FooterRecord {
    fingerprint: String,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    index: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FooterWire {
    records: Vec<FooterRecord>,
    slots: [BlobRef; 2],
    cursor: u64,
}

/// Where the footer may live and where the content region ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterLayout {
    /// The two reserved footer slots, equal in size.
    pub slots: [BlobRef; 2],
    /// Blob cursor at publish time.  Everything the footer references
    /// lies before it.
    pub cursor: u64,
}

impl FooterLayout {
    /// Bytes a sealed footer may take.
    pub fn slot_len(&self) -> u64 {
        self.slots[0].length.min(self.slots[1].length)
    }

    /// The slot not holding `active`.
    pub fn other_slot(&self, active: BlobRef) -> BlobRef {
        if self.slots[0].offset == active.offset {
            self.slots[1]
        } else {
            self.slots[0]
        }
    }

    /// `true` if `location` starts at a slot and fits inside it.
    pub fn holds(&self, location: BlobRef) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.offset == location.offset && location.length <= slot.length)
    }
}

/// In-memory footer: fingerprint hex -> sealed vault index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FooterTable {
    pub records: BTreeMap<String, Vec<u8>>,
}

impl FooterTable {
    /// Serialize the table with its layout and seal it under the device
    /// footer key.
    pub fn seal(&self, layout: &FooterLayout, keys: &FooterKeys) -> Result<Vec<u8>> {
        let wire = FooterWire {
            records: self
                .records
                .iter()
                .map(|(fingerprint, index)| FooterRecord {
                    fingerprint: fingerprint.clone(),
                    index: index.clone(),
                })
                .collect(),
            slots: layout.slots,
            cursor: layout.cursor,
        };
        let mut json = serde_json::to_vec(&wire)
            .map_err(|e| VaultKeepError::Serialization(format!("footer: {e}")))?;
        let sealed = encryption::encrypt(keys.seal_key(), &json);
        json.zeroize();
        sealed
    }

    /// Open a sealed table.  Any failure means the device secret does not
    /// belong to this container (or the footer is damaged).
    pub fn open(sealed: &[u8], keys: &FooterKeys) -> Result<(Self, FooterLayout)> {
        let mut json = encryption::decrypt(keys.seal_key(), sealed)
            .map_err(|_| VaultKeepError::FooterUnreadable)?;
        let wire: std::result::Result<FooterWire, _> = serde_json::from_slice(&json);
        json.zeroize();
        let wire = wire.map_err(|e| VaultKeepError::InvalidFormat(format!("footer JSON: {e}")))?;

        let layout = FooterLayout {
            slots: wire.slots,
            cursor: wire.cursor,
        };
        let table = Self {
            records: wire
                .records
                .into_iter()
                .map(|r| (r.fingerprint, r.index))
                .collect(),
        };
        Ok((table, layout))
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let encoded = BASE64.encode(data);
    serializer.serialize_str(&encoded)
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(seed: u8) -> FooterKeys {
        FooterKeys::derive(&[seed; 32]).unwrap()
    }

    fn layout() -> FooterLayout {
        FooterLayout {
            slots: [
                BlobRef { offset: 32, length: 1024 },
                BlobRef { offset: 1056, length: 1024 },
            ],
            cursor: 2080,
        }
    }

    #[test]
    fn header_roundtrip_preserves_pointer() {
        let masked = [0x3Cu8; MASK_LEN];
        let header = build_header(&masked);
        assert_eq!(&header[0..4], CONTAINER_MAGIC);
        assert_eq!(parse_header(&header).unwrap(), masked);
    }

    #[test]
    fn header_with_wrong_magic_is_rejected() {
        let mut header = build_header(&[0u8; MASK_LEN]);
        header[0] = b'X';
        assert!(matches!(
            parse_header(&header),
            Err(VaultKeepError::InvalidFormat(_))
        ));
    }

    #[test]
    fn pointer_encoding_roundtrip() {
        let location = BlobRef {
            offset: 0x0102_0304_0506_0708,
            length: 4242,
        };
        assert_eq!(decode_pointer(&encode_pointer(location)), location);
    }

    #[test]
    fn footer_table_seal_and_open() {
        let mut table = FooterTable::default();
        table.records.insert("00112233aabbccdd".into(), vec![1, 2, 3]);
        table.records.insert("ffeeddccbbaa9988".into(), vec![9; 40]);

        let sealed = table.seal(&layout(), &keys(1)).unwrap();
        assert_eq!(FooterTable::open(&sealed, &keys(1)).unwrap(), (table, layout()));
    }

    #[test]
    fn footer_hides_fingerprints() {
        let mut table = FooterTable::default();
        table.records.insert("00112233aabbccdd".into(), vec![1, 2, 3]);
        let sealed = table.seal(&layout(), &keys(1)).unwrap();

        let needle = b"00112233aabbccdd";
        assert!(!sealed.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn footer_from_other_device_is_unreadable() {
        let sealed = FooterTable::default().seal(&layout(), &keys(1)).unwrap();
        assert!(matches!(
            FooterTable::open(&sealed, &keys(2)),
            Err(VaultKeepError::FooterUnreadable)
        ));
    }

    #[test]
    fn layout_picks_the_other_slot() {
        let l = layout();
        let in_a = BlobRef { offset: 32, length: 300 };
        let in_b = BlobRef { offset: 1056, length: 300 };
        assert_eq!(l.other_slot(in_a), l.slots[1]);
        assert_eq!(l.other_slot(in_b), l.slots[0]);
        assert!(l.holds(in_a));
        assert!(!l.holds(BlobRef { offset: 32, length: 2000 }));
        assert!(!l.holds(BlobRef { offset: 40, length: 10 }));
        assert_eq!(l.slot_len(), 1024);
    }
}
