//! `relight reset all` / `relight reset down` — run a remediation batch
//! locally, the way an operator would from a cron job or a shell.
//!
//! Events stream to the terminal as the sweep runs. Exit codes follow the
//! routine contract: 0 all good, 2 when any reset failed, 1 on precondition
//! failures (surfaced through the error return).

use std::path::Path;

use anyhow::Context;
use colored::Colorize;

use crate::config;
use crate::domain::batch::{self, ResetScope};
use crate::domain::events::{EventKind, EventSink, ProgressEvent};

/// Renders each lifecycle event as a terminal line the moment it happens —
/// the CLI flavor of the streaming consumption mode.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: ProgressEvent) {
        let tag = match event.kind {
            EventKind::Start | EventKind::Complete => "::".blue().bold(),
            EventKind::ResetSuccess | EventKind::VerificationSuccess => "ok".green().bold(),
            EventKind::ResetError | EventKind::VerificationFailed | EventKind::Error => {
                "!!".red().bold()
            }
            _ => "..".dimmed(),
        };
        println!("  {} {}", tag, event.message);
    }
}

pub fn run(scope: ResetScope, timeout: Option<u64>, config_path: Option<String>) -> anyhow::Result<()> {
    let config = config::load(config_path.as_deref().map(Path::new))?;
    let timeout = timeout.unwrap_or(config.default_timeout_secs);

    let title = match scope {
        ResetScope::Full => "relight reset all",
        ResetScope::DownOnly => "relight reset down",
    };
    println!("{}", title.bold());
    println!();

    let run = batch::execute(&config, scope, timeout, &StdoutSink)
        .context("batch remediation aborted")?;

    println!();
    println!("{}", "Summary".bold());
    println!("  total:      {}", run.total);
    println!("  reachable:  {}", run.reachable);
    println!("  attempted:  {}", run.attempted);
    println!("  succeeded:  {} ({} verified)", run.succeeded, run.verified);
    println!("  failed:     {}", run.failed);

    for outcome in &run.outcomes {
        if outcome.outcome == crate::domain::types::OutcomeKind::ResetFailed {
            println!("  {} {} — {}", "!!".red().bold(), outcome.location, outcome.detail);
        }
    }

    if run.failed > 0 {
        std::process::exit(2);
    }
    Ok(())
}
