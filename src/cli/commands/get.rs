//! `vaultkeep get` — decrypt a file to disk or stdout.

use std::io::Write;

use zeroize::Zeroize;

use crate::cli::output;
use crate::cli::{open_store, vault_key, Cli};
use crate::errors::Result;

/// Execute the `get` command.
pub fn execute(cli: &Cli, id: &str, out: Option<&str>) -> Result<()> {
    let key = vault_key(cli)?;
    let store = open_store(cli)?;

    let (header, mut content) = store.retrieve_file(id, &key)?;

    match out {
        Some(path) => {
            std::fs::write(path, &content)?;
            output::success(&format!(
                "Wrote {} ({}) to {path}",
                header.filename,
                output::human_size(header.size)
            ));
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
    }

    content.zeroize();
    Ok(())
}
