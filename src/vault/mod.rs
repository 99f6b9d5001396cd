//! Vault module — per-key catalogs and the file store facade.
//!
//! This module provides:
//! - `VaultIndex`, `FileEntry` and listing types (`index`)
//! - `IndexManager`, which keeps every vault's index in the container
//!   footer under per-key reentrant locks (`manager`)
//! - High-level `VaultStore` for storing, retrieving, listing and deleting
//!   files (`store`)

pub mod index;
pub mod manager;
pub mod store;

// Re-export the most commonly used items.
pub use index::{FileEntry, FileHeader, FileSummary, PayloadEncoding, VaultIndex};
pub use manager::IndexManager;
pub use store::VaultStore;
