// Main binary that starts the provisioning daemon
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use std::io::stderr;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod cmd;
mod config;

use cmd::arp::ArpArgs;
use cmd::check::CheckArgs;
use cmd::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bootherd network provisioning daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the DHCP listener for machines with a provisioning record
    Serve(ServeArgs),
    /// Writes one entry into the kernel ARP table
    ArpInject(ArpArgs),
    /// Parses every manifest in a directory and reports which would load
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info (or debug with -v) for our crates
    let level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "bootherd={level},bootherd_dhcp={level},bootherd_store={level},bootherd_manifest={level}",
        level = level
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    match cli.command {
        Commands::Serve(args) => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl+C received, sending shutdown signal...");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to install Ctrl+C handler");
                        // keep the sender alive so the listener keeps running
                        std::future::pending::<()>().await;
                    }
                }
            });
            cmd::serve::run_serve(args, shutdown_rx).await
        }
        Commands::ArpInject(args) => cmd::arp::run_arp_inject(args),
        Commands::Check(args) => {
            if !cmd::check::run_check(args)? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
