//! `vaultkeep keygen` — write a new random keyfile.

use std::path::Path;

use crate::cli::output;
use crate::crypto::keyfile::generate_keyfile;
use crate::errors::Result;

/// Execute the `keygen` command.
pub fn execute(path: &str) -> Result<()> {
    let path = Path::new(path);
    generate_keyfile(path)?;

    output::success(&format!("Keyfile written to {}", path.display()));
    output::tip("Each keyfile opens its own vault; keep it somewhere safe.");
    Ok(())
}
