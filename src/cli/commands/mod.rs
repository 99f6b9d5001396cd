//! One module per subcommand.

pub mod delete;
pub mod get;
pub mod init;
pub mod keygen;
pub mod list;
pub mod store;
pub mod wipe;
