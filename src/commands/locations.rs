use std::path::Path;

use colored::Colorize;

use crate::config;
use crate::domain::directory::Directory;

/// Print the location directory: probe targets plus their port assignments.
pub fn run(config_path: Option<String>) -> anyhow::Result<()> {
    let config = config::load(config_path.as_deref().map(Path::new))?;
    let directory = Directory::load(&config.directory_file)?;

    if directory.is_empty() {
        println!(
            "{} No usable rows in {}",
            "::".blue().bold(),
            config.directory_file.display()
        );
        return Ok(());
    }

    println!("{}", "Locations".bold());
    println!();

    for record in directory.records() {
        match directory.assignment(&record.location) {
            Some(assignment) => println!(
                "  {} — {} (switch {} port {})",
                record.location.bold(),
                record.address,
                assignment.switch_address,
                assignment.port
            ),
            None => println!(
                "  {} — {} ({})",
                record.location.bold(),
                record.address,
                "no port assignment".dimmed()
            ),
        }
    }

    println!();
    Ok(())
}
