//! `vaultkeep init`: create the container and device key.

use std::fs;

use crate::cli::output;
use crate::cli::{load_settings, Cli};
use crate::crypto::keyfile::generate_keyfile;
use crate::errors::{Result, VaultKeepError};
use crate::vault::VaultStore;

/// Execute the `init` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let (cwd, settings) = load_settings(cli)?;
    let vault_dir = settings.vault_dir_path(&cwd);
    let container = settings.container_path(&vault_dir);

    // 1. Create the vault directory if it doesn't exist.
    if !vault_dir.exists() {
        fs::create_dir_all(&vault_dir)?;
        output::info(&format!("Created vault directory: {}", vault_dir.display()));
    }

    // 2. Refuse to touch an existing container.
    if container.exists() {
        output::tip("Use `vaultkeep store` to add files to the existing container.");
        return Err(VaultKeepError::CommandFailed(format!(
            "container already exists at {}",
            container.display()
        )));
    }

    // 3. Create the container (and the device key on first use).
    VaultStore::open_in(&vault_dir, &settings)?;
    output::success(&format!("Container created at {}", container.display()));

    // 4. Generate the first keyfile if one was named but does not exist.
    if let Some(path) = cli.keyfile.as_deref() {
        let path = std::path::Path::new(path);
        if !path.exists() {
            generate_keyfile(path)?;
            output::success(&format!("Keyfile written to {}", path.display()));
        }
    }

    output::warning("Back up the device key. Without it, no vault in this container can be opened.");
    output::tip("Run `vaultkeep keygen <PATH>` to create a keyfile for each vault.");
    output::tip("Run `vaultkeep --keyfile <PATH> store <FILE>` to add a file.");

    Ok(())
}
