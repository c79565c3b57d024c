use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use symbolicator::cli::{self, Config};
use symbolicator::commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing subscriber controlled by `RUST_LOG`, logging to stderr so that stdout only carries
    // command output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let matches = cli::command().get_matches();
    let config = Config::from_matches(&matches)?;

    match matches.subcommand() {
        Some(("run", _)) => commands::run(config).await,
        Some(("cleanup", _)) => commands::cleanup(config).await,
        Some(("symbolicate", sub_matches)) => {
            let request = sub_matches
                .get_one::<PathBuf>("request")
                .context("missing request file")?;
            commands::symbolicate(config, request).await
        }
        Some((name, _)) => bail!("unknown subcommand {name}"),
        None => bail!("missing subcommand"),
    }
}
