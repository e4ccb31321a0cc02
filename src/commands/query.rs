//! `relight query` — query a running relight daemon via its REST API.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::client::RelightClient;

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Daemon health check
    Health,
    /// Location directory listing
    Locations,
    /// Probe snapshot of every location (slow: sequential pings)
    Reachability,
    /// Trigger a full remediation batch
    ResetAll {
        /// Per-operation timeout in seconds (1-300)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Trigger a down-only remediation batch
    ResetDown {
        /// Per-operation timeout in seconds (1-300)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

pub fn run(url: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(url, format, command))
}

async fn run_async(url: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let client = RelightClient::new(url)?;

    match command {
        QueryCommands::Health => {
            let health = client.health().await?;
            if format == "json" {
                return print_json(&health);
            }
            println!("{}", "Daemon".bold());
            println!("  version:     {}", health.version);
            println!("  uptime:      {}s", health.uptime_secs);
            println!("  directory:   {}", health.directory_file);
            println!(
                "  credentials: {}",
                if health.credentials_configured {
                    "configured".green()
                } else {
                    "missing".red()
                }
            );
            Ok(())
        }
        QueryCommands::Locations => {
            let records = client.locations().await?;
            if format == "json" {
                return print_json(&records);
            }
            for record in records {
                println!("  {} — {}", record.location.bold(), record.address);
            }
            Ok(())
        }
        QueryCommands::Reachability => {
            let snapshot = client.reachability().await?;
            if format == "json" {
                return print_json(&snapshot);
            }
            for entry in snapshot {
                let status = if entry.reachable {
                    "reachable".green()
                } else {
                    "unreachable".red()
                };
                println!("  {} ({}) — {}", entry.location.bold(), entry.address, status);
            }
            Ok(())
        }
        QueryCommands::ResetAll { timeout } => {
            print_json(&client.reset_all(*timeout).await?)
        }
        QueryCommands::ResetDown { timeout } => {
            print_json(&client.reset_down(*timeout).await?)
        }
    }
}

fn print_json<T: serde::Serialize>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}
