//! Storage layer — the shared container file.
//!
//! This module provides:
//! - The append-only blob region (`blob`)
//! - Container header and sealed footer table (`footer`)
//! - Best-effort overwrite-then-remove helpers (`secure_delete`)

pub mod blob;
pub mod footer;
pub mod secure_delete;

pub use blob::{BlobRef, BlobStore};
pub use footer::{FooterLayout, FooterTable};
