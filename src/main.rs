mod api;
mod client;
mod commands;
mod config;
mod domain;
mod server;

use clap::{Parser, Subcommand};

use crate::domain::batch::ResetScope;

#[derive(Parser)]
#[command(
    name = "relight",
    version,
    about = "PoE port power-cycle daemon for recovering unreachable network devices"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relight daemon (REST + NDJSON streaming)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,

        /// Path to config file (default: ~/.config/relight/config.yaml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Probe every location and print a reachability table
    Check {
        /// Probe timeout in seconds (1-300)
        #[arg(long)]
        timeout: Option<u64>,

        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Print the location directory
    Locations {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Run a remediation batch locally
    Reset {
        #[command(subcommand)]
        command: ResetCommands,
    },

    /// Query a running relight daemon's REST API
    Query {
        /// Daemon base URL (default: http://127.0.0.1:9300)
        #[arg(long, global = true)]
        url: Option<String>,

        /// Output format (table or json)
        #[arg(long, global = true, default_value = "table")]
        format: String,

        #[command(subcommand)]
        command: commands::query::QueryCommands,
    },
}

#[derive(Subcommand)]
enum ResetCommands {
    /// Sweep every location: probe, power-cycle the unreachable, verify
    All {
        /// Per-operation timeout in seconds (1-300)
        #[arg(long)]
        timeout: Option<u64>,

        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },
    /// Same sweep, reporting only the targets that failed the probe
    Down {
        /// Per-operation timeout in seconds (1-300)
        #[arg(long)]
        timeout: Option<u64>,

        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            http_addr,
            log_level,
            config,
        } => commands::daemon::run(http_addr, log_level, config),
        Commands::Check { timeout, config } => commands::check::run(timeout, config),
        Commands::Locations { config } => commands::locations::run(config),
        Commands::Reset { command } => match command {
            ResetCommands::All { timeout, config } => {
                commands::reset::run(ResetScope::Full, timeout, config)
            }
            ResetCommands::Down { timeout, config } => {
                commands::reset::run(ResetScope::DownOnly, timeout, config)
            }
        },
        Commands::Query {
            url,
            format,
            command,
        } => commands::query::run(url.as_deref(), &format, &command),
    }
}
