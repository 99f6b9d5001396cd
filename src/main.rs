use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vaultkeep::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    setup_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init => vaultkeep::cli::commands::init::execute(&cli),
        Commands::Keygen { ref path } => vaultkeep::cli::commands::keygen::execute(path),
        Commands::Store {
            ref file,
            ref mime,
            ref thumbnail,
            shred,
        } => vaultkeep::cli::commands::store::execute(
            &cli,
            file,
            mime,
            thumbnail.as_deref(),
            shred,
        ),
        Commands::Get { ref id, ref output } => {
            vaultkeep::cli::commands::get::execute(&cli, id, output.as_deref())
        }
        Commands::List => vaultkeep::cli::commands::list::execute(&cli),
        Commands::Delete { ref id, force } => {
            vaultkeep::cli::commands::delete::execute(&cli, id, force)
        }
        Commands::Wipe { force } => vaultkeep::cli::commands::wipe::execute(&cli, force),
    };

    if let Err(e) = result {
        vaultkeep::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}

/// Logs go to stderr so `get` can stream file content to stdout.
/// `RUST_LOG` wins over `-v` when set.
fn setup_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
