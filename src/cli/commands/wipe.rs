//! `vaultkeep wipe` — destroy one vault's catalog.
//!
//! Only the catalog for the given keyfile is removed.  Other vaults in the
//! same container keep working and nothing in the container reveals that
//! they exist.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{open_store, vault_key, Cli};
use crate::errors::{Result, VaultKeepError};

/// Execute the `wipe` command.
pub fn execute(cli: &Cli, force: bool) -> Result<()> {
    let key = vault_key(cli)?;
    let store = open_store(cli)?;

    if !store.indexes().has_index(&key) {
        output::info("No vault opens with this keyfile; nothing to wipe.");
        return Ok(());
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Destroy this vault's catalog? Its files become unrecoverable.")
            .default(false)
            .interact()
            .map_err(|e| VaultKeepError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            return Err(VaultKeepError::UserCancelled);
        }
    }

    store.delete_vault_index(&key)?;

    output::success("Vault catalog destroyed.");
    output::tip("Overwriting is best effort; flash storage may retain old copies.");
    Ok(())
}
