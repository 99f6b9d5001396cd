//! `vaultkeep delete` — remove a file from the vault.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{open_store, vault_key, Cli};
use crate::errors::{Result, VaultKeepError};

/// Execute the `delete` command.
pub fn execute(cli: &Cli, id: &str, force: bool) -> Result<()> {
    let key = vault_key(cli)?;

    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete file '{id}'?"))
            .default(false)
            .interact()
            .map_err(|e| VaultKeepError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    let store = open_store(cli)?;
    store.delete_file(id, &key)?;

    output::success(&format!("Deleted file '{id}'"));
    Ok(())
}
