use std::path::Path;

use colored::Colorize;

use crate::config;
use crate::domain::batch;
use crate::domain::directory::Directory;
use crate::domain::probe::{PingProber, Prober};

/// Probe every location in the directory and print a reachability table.
/// Exits non-zero when anything is down, so this slots into shell checks.
pub fn run(timeout: Option<u64>, config_path: Option<String>) -> anyhow::Result<()> {
    let config = config::load(config_path.as_deref().map(Path::new))?;
    let timeout = timeout.unwrap_or(config.default_timeout_secs);
    batch::validate_timeout(timeout)?;

    let directory = Directory::load(&config.directory_file)?;
    if directory.is_empty() {
        println!("{} No locations in {}", "::".blue().bold(), config.directory_file.display());
        return Ok(());
    }

    println!("{}", "relight check".bold());
    println!();

    let prober = PingProber::new(config.probe_count);
    let mut down = 0usize;
    for record in directory.records() {
        let reachable = prober.probe(&record.address, timeout);
        let status_icon = if reachable {
            "ok".green().bold()
        } else {
            down += 1;
            "!!".red().bold()
        };
        let status_text = if reachable { "reachable" } else { "unreachable" };

        println!(
            "  {} {} ({}) — {}",
            status_icon,
            record.location.bold(),
            record.address.dimmed(),
            status_text
        );
    }

    println!();
    if down > 0 {
        println!(
            "{} {down} of {} locations unreachable",
            "!!".red().bold(),
            directory.len()
        );
        std::process::exit(1);
    }

    println!("{} all {} locations reachable", "ok".green().bold(), directory.len());
    Ok(())
}
