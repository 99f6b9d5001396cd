//! CLI module — Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::Settings;
use crate::crypto::keyfile::{KeyProvider, KeyfileProvider};
use crate::crypto::keys::VaultKey;
use crate::errors::{Result, VaultKeepError};
use crate::vault::VaultStore;

/// VaultKeep CLI: encrypted multi-vault file store.
#[derive(Parser)]
#[command(
    name = "vaultkeep",
    about = "Encrypted multi-vault file store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault directory (overrides `vault_dir` in .vaultkeep.toml)
    #[arg(long, global = true)]
    pub vault_dir: Option<String>,

    /// Keyfile that unlocks the vault to operate on
    #[arg(short, long, env = "VAULTKEEP_KEYFILE", global = true)]
    pub keyfile: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create the container and device key in the vault directory
    Init,

    /// Generate a new random keyfile (one keyfile = one vault)
    Keygen {
        /// Where to write the keyfile
        path: String,
    },

    /// Encrypt a file into the vault
    Store {
        /// File to store
        file: String,

        /// MIME type recorded with the file
        #[arg(short, long, default_value = "application/octet-stream")]
        mime: String,

        /// Optional thumbnail file (stored as opaque bytes)
        #[arg(long)]
        thumbnail: Option<String>,

        /// Overwrite and remove the plaintext source after storing
        #[arg(long)]
        shred: bool,
    },

    /// Decrypt a file from the vault
    Get {
        /// File id (see `list`)
        id: String,

        /// Output path (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List all files in the vault
    List,

    /// Delete a file from the vault
    Delete {
        /// File id
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Destroy this vault's catalog, leaving other vaults intact
    Wipe {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Load settings from the current directory, applying `--vault-dir`.
pub fn load_settings(cli: &Cli) -> Result<(PathBuf, Settings)> {
    let cwd = std::env::current_dir()?;
    let mut settings = Settings::load(&cwd)?;
    if let Some(dir) = &cli.vault_dir {
        settings.vault_dir.clone_from(dir);
    }
    Ok((cwd, settings))
}

/// Open the container, failing if `init` has not been run.
pub fn open_store(cli: &Cli) -> Result<VaultStore> {
    let (cwd, settings) = load_settings(cli)?;
    let dir = settings.vault_dir_path(&cwd);
    let container = settings.container_path(&dir);

    if !container.exists() {
        output::tip("Run `vaultkeep init` to create a container.");
        return Err(VaultKeepError::CommandFailed(format!(
            "no container at {}",
            container.display()
        )));
    }

    VaultStore::open_in(&dir, &settings)
}

/// Resolve the vault key from `--keyfile` / `VAULTKEEP_KEYFILE`.
pub fn vault_key(cli: &Cli) -> Result<VaultKey> {
    let path = cli.keyfile.as_deref().ok_or_else(|| {
        VaultKeepError::CommandFailed(
            "no keyfile given; pass --keyfile <path> or set VAULTKEEP_KEYFILE".into(),
        )
    })?;
    KeyfileProvider::new(Path::new(path)).vault_key()
}

/// Read an optional thumbnail file.
pub fn read_thumbnail(path: Option<&str>) -> Result<Option<Vec<u8>>> {
    path.map(|p| std::fs::read(p).map_err(VaultKeepError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_store_with_options() {
        let cli = Cli::try_parse_from([
            "vaultkeep",
            "--keyfile",
            "k.key",
            "store",
            "scan.pdf",
            "--mime",
            "application/pdf",
            "--shred",
        ])
        .unwrap();

        assert_eq!(cli.keyfile.as_deref(), Some("k.key"));
        match cli.command {
            Commands::Store {
                file, mime, shred, ..
            } => {
                assert_eq!(file, "scan.pdf");
                assert_eq!(mime, "application/pdf");
                assert!(shred);
            }
            _ => panic!("expected store"),
        }
    }

    #[test]
    fn verbose_flag_counts() {
        let cli = Cli::try_parse_from(["vaultkeep", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn missing_keyfile_is_a_clear_error() {
        let cli = Cli::try_parse_from(["vaultkeep", "list"]).unwrap();
        if cli.keyfile.is_none() {
            assert!(matches!(
                vault_key(&cli),
                Err(VaultKeepError::CommandFailed(_))
            ));
        }
    }
}
