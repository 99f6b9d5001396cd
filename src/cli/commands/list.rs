//! `vaultkeep list` — display all files in a table.

use crate::cli::output;
use crate::cli::{open_store, vault_key, Cli};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let key = vault_key(cli)?;
    let store = open_store(cli)?;

    let files = store.list_files(&key)?;

    output::info(&format!("{} file(s)", files.len()));
    output::print_files_table(&files);

    Ok(())
}
