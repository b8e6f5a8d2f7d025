//! Wallet Recovery - recover a wallet with its recovery mnemonic
//!
//! # WARNING
//! - The mnemonic controls the recovery signer. Never run this on a shared machine.
//! - Approving a signing request is final once the manager submits it on-chain.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use wallet_recovery::cli::commands;
use wallet_recovery::config::Config;

/// Wallet Recovery - recovery session coordinator
#[derive(Parser)]
#[command(name = "recover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "recovery.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover a wallet and show its pending recovery queue
    Recover,

    /// Show the recovery queue, optionally for one chain
    Queue {
        /// Only show payloads for this chain id
        #[arg(long)]
        chain: Option<u64>,

        /// Keep polling until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Review a signing request (JSON file) and approve or cancel it
    Sign {
        /// Path to the signing request
        #[arg(long)]
        request: PathBuf,

        /// External wallet connection: injected, wallet-connect, none
        #[arg(long, default_value = "injected")]
        connection: String,
    },

    /// Show current configuration
    Config,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wallet_recovery=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(false);
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.json);

    // Execute command
    let result = match cli.command {
        Commands::Recover => commands::recover(&config).await,
        Commands::Queue { chain, watch } => commands::queue(&config, chain, watch).await,
        Commands::Sign {
            request,
            connection,
        } => commands::sign(&config, &request, &connection).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
