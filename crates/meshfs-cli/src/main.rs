#![forbid(unsafe_code)]

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{gateway, serve_shares};

#[derive(Parser)]
#[command(name = "meshfs")]
#[command(author, version, about = "Share directories between overlay-network nodes over WebDAV")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve local share directories, printing the bound address first.
    ///
    /// This is the per-user file server spawned by the remote gateway; the
    /// first line on stdout is the bound address, everything afterwards is
    /// diagnostics.
    ServeShares(serve_shares::Args),

    /// Run a standalone remote gateway over a share control file.
    Gateway(gateway::Args),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // Diagnostics go to stderr: stdout carries the bootstrap address line
    // that the supervising parent reads.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::ServeShares(args) => runtime.block_on(serve_shares::run(args)),
        Commands::Gateway(args) => runtime.block_on(gateway::run(args)),
    }
}
