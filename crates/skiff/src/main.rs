//! Skiff CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use skiff::cli::{self, Cli, LogFormat};

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.debug { "skiff=debug" } else { "skiff=info" };
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.parse()?));
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init(),
    }

    // Container pid 1 stays single-threaded up to its exec.
    if cli.is_init() {
        return cli::run_init();
    }

    // Execute command
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(cli.execute())
}
