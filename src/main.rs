// src/main.rs

//! The main entry point for the valkey-vigil daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use valkey_vigil::config::{Config, DEFAULT_CONFIG_PATH};
use valkey_vigil::failover::FailoverClient;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = env!("VIGIL_COMMIT");
const RUSTC_VERSION: &str = env!("VIGIL_RUSTC_VERSION");

/// Fails over a group of Valkey databases based on a virtual IP.
#[derive(Parser)]
#[command(name = NAME, version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Expand environment variables in config file
    #[arg(long)]
    env: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = cli.command {
        print_version();
        return Ok(());
    }

    // Load the configuration. The daemon cannot run without a valid one, so
    // any failure here is fatal.
    let config = match Config::load(&cli.config, cli.env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {e:#}");
            std::process::exit(1);
        }
    };

    // The level was validated during config loading; RUST_LOG overrides it.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.to_lowercase());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!(config = %cli.config, "Loaded configuration");

    let mut client = FailoverClient::new(&config.valkey);
    client.run().await;

    Ok(())
}

fn print_version() {
    println!("{NAME}:");
    println!("    Version: {VERSION}");
    println!("    Commit:  {COMMIT}");
    println!("    Rust:    {RUSTC_VERSION}");
}
