//! `vaultkeep store` — encrypt a file into the vault.

use std::path::Path;

use crate::cli::output;
use crate::cli::{open_store, read_thumbnail, vault_key, Cli};
use crate::errors::Result;

/// Execute the `store` command.
pub fn execute(
    cli: &Cli,
    file: &str,
    mime: &str,
    thumbnail: Option<&str>,
    shred: bool,
) -> Result<()> {
    let key = vault_key(cli)?;
    let store = open_store(cli)?;
    let thumbnail = read_thumbnail(thumbnail)?;

    let path = Path::new(file);
    let id = store.import_file(path, mime, &key, thumbnail.as_deref(), shred)?;

    output::success(&format!("Stored {} as {id}", path.display()));
    if shred {
        output::info("Plaintext source overwritten and removed (best effort).");
    }

    Ok(())
}
