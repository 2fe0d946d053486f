//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod check;
pub mod config;
pub mod fetch;
pub mod health;
pub mod run;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "watchcaller")]
#[command(version)]
#[command(about = "Watch remote resources and download them when they change", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watch loop, download manager and health server
    Run {
        /// Override the tick interval (e.g., "30s", "5m", "1h")
        #[arg(long)]
        interval: Option<String>,
        /// Run a single cycle for every target, then exit
        #[arg(long)]
        once: bool,
    },
    /// Probe every configured target and print its current fingerprint
    Check,
    /// Download a URL once into the downloads directory
    Fetch {
        /// URL to download
        url: String,
        /// Artifact key (derived from the URL if omitted)
        #[arg(long)]
        key: Option<String>,
    },
    /// Query a running instance's health endpoint (exits non-zero when unhealthy)
    Health {
        /// Health endpoint URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment)
    Show,
    /// Check configuration for errors and warnings
    Check,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    // `.env` first, so it feeds both logging and the config layers.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logging settings come from the same layered config; fall back to
    // defaults here and let the command report config errors itself.
    let logging_cfg = watchcaller::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = watchcaller::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Run { interval, once }) => {
            run::cmd_run(interval, once).await?;
        }
        Some(Commands::Check) => {
            check::cmd_check().await?;
        }
        Some(Commands::Fetch { url, key }) => {
            fetch::cmd_fetch(url, key).await?;
        }
        Some(Commands::Health { url }) => {
            health::cmd_health(url).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action).await?;
        }
    }

    Ok(())
}

/// Display version information
fn cmd_version() {
    println!("watchcaller {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Watch remote resources and download them when they change");
}
