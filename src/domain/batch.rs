//! Batch remediation sweep.
//!
//! One run: load a directory snapshot, probe every location in order, cycle
//! the port behind each one that stays dark, then — after the whole sweep —
//! wait a single settle delay and re-probe everything that was reset.
//! Targets are processed strictly sequentially with a short pause between
//! them; embedded switch CPUs handle concurrent management sessions badly.
//!
//! Per-target failures are classified and recorded, never allowed to stop
//! the sweep. Only precondition failures (bad timeout, missing credentials,
//! unreadable directory) abort the batch, and they do so before any remote
//! action.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::directory::{Directory, LocationRecord};
use crate::domain::events::{EventKind, EventSink, ProgressEvent};
use crate::domain::probe::{PingProber, Prober};
use crate::domain::switch::{
    PortRemediator, RemediationTarget, Ssh2Remediator, SshCredentials,
};
use crate::domain::types::{AttemptOutcome, BatchRun, OutcomeKind};

pub const TIMEOUT_MIN_SECS: u64 = 1;
pub const TIMEOUT_MAX_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error(
        "invalid timeout: must be between {TIMEOUT_MIN_SECS} and {TIMEOUT_MAX_SECS} seconds, got {0}"
    )]
    InvalidTimeout(u64),
    #[error("SSH credentials not configured; set SSH_USERNAME and SSH_PASSWORD")]
    MissingCredentials,
    #[error("cannot read location directory: {0}")]
    Directory(String),
}

/// Which locations the result detail reports on.
///
/// Both scopes run the same probe-gated sweep — power-cycling a port that is
/// answering would cause the very outage this tool exists to fix. `Full`
/// lists every location including the reachable ones; `DownOnly` lists only
/// the targets that failed the probe, leaving reachable locations to the
/// aggregate counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    Full,
    DownOnly,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub timeout_secs: u64,
    pub settle_secs: u64,
    pub inter_target_delay: Duration,
    pub scope: ResetScope,
}

impl BatchOptions {
    pub fn from_config(config: &AppConfig, scope: ResetScope, timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            settle_secs: config.settle_secs,
            inter_target_delay: Duration::from_secs(config.inter_target_delay_secs),
            scope,
        }
    }
}

pub fn validate_timeout(timeout_secs: u64) -> Result<(), PreconditionError> {
    if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&timeout_secs) {
        return Err(PreconditionError::InvalidTimeout(timeout_secs));
    }
    Ok(())
}

pub struct BatchRunner<'a> {
    prober: &'a dyn Prober,
    remediator: &'a dyn PortRemediator,
    credentials: Option<&'a SshCredentials>,
    sleeper: Box<dyn Fn(Duration) + Send + Sync + 'a>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        prober: &'a dyn Prober,
        remediator: &'a dyn PortRemediator,
        credentials: Option<&'a SshCredentials>,
    ) -> Self {
        Self {
            prober,
            remediator,
            credentials,
            sleeper: Box::new(|d| std::thread::sleep(d)),
        }
    }

    /// Replace the delay hook. Tests record delays instead of sleeping.
    pub fn with_sleeper(mut self, sleeper: Box<dyn Fn(Duration) + Send + Sync + 'a>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn run(
        &self,
        directory: &Directory,
        options: &BatchOptions,
        sink: &dyn EventSink,
    ) -> Result<BatchRun, PreconditionError> {
        validate_timeout(options.timeout_secs)?;
        let credentials = self.credentials.ok_or(PreconditionError::MissingCredentials)?;

        let total = directory.len();
        info!(total, scope = ?options.scope, "starting batch remediation sweep");
        sink.emit(ProgressEvent::new(
            EventKind::Start,
            format!("Checking {total} locations"),
        ));

        let mut outcomes: Vec<AttemptOutcome> = Vec::with_capacity(total);
        for (index, record) in directory.records().iter().enumerate() {
            sink.emit(
                ProgressEvent::new(
                    EventKind::Progress,
                    format!("[{}/{}] Processing {}", index + 1, total, record.location),
                )
                .at(&record.location, &record.address),
            );

            let outcome = self.process_target(record, directory, credentials, options, sink);
            outcomes.push(outcome);

            if index + 1 < total {
                (self.sleeper)(options.inter_target_delay);
            }
        }

        self.verify_resets(&mut outcomes, options, sink);

        let reported = match options.scope {
            ResetScope::Full => outcomes.clone(),
            ResetScope::DownOnly => outcomes
                .iter()
                .filter(|o| o.outcome != OutcomeKind::ReachableNoAction)
                .cloned()
                .collect(),
        };
        let run = BatchRun::from_outcomes(total, &outcomes, reported);

        info!(summary = %run.summary(), success = run.success, "batch sweep finished");
        sink.emit(ProgressEvent::new(EventKind::Complete, run.summary()));
        Ok(run)
    }

    /// Reset one named location directly, without the probe gate. Used by
    /// the single-location endpoint; directory drift shows up here as a
    /// configuration-missing outcome rather than an error.
    pub fn reset_location(
        &self,
        directory: &Directory,
        location: &str,
        options: &BatchOptions,
        sink: &dyn EventSink,
    ) -> Result<AttemptOutcome, PreconditionError> {
        validate_timeout(options.timeout_secs)?;
        let credentials = self.credentials.ok_or(PreconditionError::MissingCredentials)?;

        let address = directory
            .records()
            .iter()
            .find(|r| r.location == location)
            .map(|r| r.address.clone())
            .unwrap_or_default();

        let Some(assignment) = directory.assignment(location) else {
            return Ok(AttemptOutcome::new(
                location,
                &address,
                OutcomeKind::ConfigurationMissing,
                "no port assignment for location".to_string(),
            ));
        };

        Ok(self.cycle(location, &address, assignment.switch_address.clone(), &assignment.port, credentials, options, sink))
    }

    fn process_target(
        &self,
        record: &LocationRecord,
        directory: &Directory,
        credentials: &SshCredentials,
        options: &BatchOptions,
        sink: &dyn EventSink,
    ) -> AttemptOutcome {
        // An unclassified error in any per-target step must not take down
        // the sweep; it becomes a processing-error record for this location.
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            self.attempt_target(record, directory, credentials, options, sink)
        }));

        match attempt {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(location = %record.location, "unexpected error while processing target");
                sink.emit(
                    ProgressEvent::new(
                        EventKind::Error,
                        format!("Unexpected error while processing {}", record.location),
                    )
                    .at(&record.location, &record.address),
                );
                AttemptOutcome::new(
                    &record.location,
                    &record.address,
                    OutcomeKind::ProcessingError,
                    "unexpected error during processing".to_string(),
                )
            }
        }
    }

    fn attempt_target(
        &self,
        record: &LocationRecord,
        directory: &Directory,
        credentials: &SshCredentials,
        options: &BatchOptions,
        sink: &dyn EventSink,
    ) -> AttemptOutcome {
        let reachable = self.prober.probe(&record.address, options.timeout_secs);
        sink.emit(
            ProgressEvent::new(
                EventKind::PingResult,
                format!(
                    "{} is {}",
                    record.address,
                    if reachable { "reachable" } else { "unreachable" }
                ),
            )
            .at(&record.location, &record.address),
        );

        if reachable {
            info!(location = %record.location, address = %record.address, "reachable, no action");
            return AttemptOutcome::new(
                &record.location,
                &record.address,
                OutcomeKind::ReachableNoAction,
                "device answered probe".to_string(),
            );
        }

        let Some(assignment) = directory.assignment(&record.location) else {
            // Directory drift: the hardware sheet knows this location but
            // the port sheet no longer does.
            warn!(location = %record.location, "no port assignment for unreachable location");
            sink.emit(
                ProgressEvent::new(
                    EventKind::ResetError,
                    format!("No port assignment for {}", record.location),
                )
                .at(&record.location, &record.address),
            );
            return AttemptOutcome::new(
                &record.location,
                &record.address,
                OutcomeKind::ConfigurationMissing,
                "no port assignment for location".to_string(),
            );
        };

        self.cycle(
            &record.location,
            &record.address,
            assignment.switch_address.clone(),
            &assignment.port,
            credentials,
            options,
            sink,
        )
    }

    fn cycle(
        &self,
        location: &str,
        address: &str,
        switch_address: String,
        port: &str,
        credentials: &SshCredentials,
        options: &BatchOptions,
        sink: &dyn EventSink,
    ) -> AttemptOutcome {
        sink.emit(
            ProgressEvent::new(
                EventKind::ResetAttempt,
                format!("Cycling port {port} on {switch_address} for {location}"),
            )
            .at(location, address),
        );

        let target = RemediationTarget {
            address: switch_address,
            credentials: credentials.clone(),
            timeout_secs: options.timeout_secs,
        };

        match self.remediator.cycle_port(&target, port) {
            Ok(report) => {
                info!(location = %location, port = %port, "port cycle succeeded");
                sink.emit(
                    ProgressEvent::new(
                        EventKind::ResetSuccess,
                        format!("Port {port} cycled for {location}"),
                    )
                    .at(location, address),
                );
                let detail = match report.port_status {
                    Some(status) => format!("port cycled; switch reports: {status}"),
                    None => "port cycled".to_string(),
                };
                AttemptOutcome::new(location, address, OutcomeKind::ResetSucceeded, detail)
                    .with_port(port)
            }
            Err(e) => {
                warn!(location = %location, kind = e.kind(), error = %e, "port cycle failed");
                sink.emit(
                    ProgressEvent::new(EventKind::ResetError, e.to_string()).at(location, address),
                );
                AttemptOutcome::new(
                    location,
                    address,
                    OutcomeKind::ResetFailed,
                    format!("{} ({})", e, e.kind()),
                )
                .with_port(port)
            }
        }
    }

    /// Deferred verification: one settle delay for the whole batch, then a
    /// re-probe of every successfully-reset target. Deliberately not
    /// per-target — the settle delay is amortized once across the sweep.
    fn verify_resets(
        &self,
        outcomes: &mut [AttemptOutcome],
        options: &BatchOptions,
        sink: &dyn EventSink,
    ) {
        let pending: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.outcome == OutcomeKind::ResetSucceeded)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }

        info!(
            count = pending.len(),
            settle_secs = options.settle_secs,
            "waiting for devices to settle before verification"
        );
        sink.emit(ProgressEvent::new(
            EventKind::BatchVerificationStart,
            format!(
                "Waiting {}s before verifying {} reset ports",
                options.settle_secs,
                pending.len()
            ),
        ));
        (self.sleeper)(Duration::from_secs(options.settle_secs));

        for index in pending {
            let outcome = &outcomes[index];
            sink.emit(
                ProgressEvent::new(
                    EventKind::VerificationProgress,
                    format!("Re-probing {}", outcome.location),
                )
                .at(&outcome.location, &outcome.address),
            );

            let reachable = self.prober.probe(&outcome.address, options.timeout_secs);
            let upgraded = outcome.with_verification(reachable);
            if reachable {
                info!(location = %upgraded.location, "device recovered after reset");
                sink.emit(
                    ProgressEvent::new(
                        EventKind::VerificationSuccess,
                        format!("{} recovered after reset", upgraded.location),
                    )
                    .at(&upgraded.location, &upgraded.address),
                );
            } else {
                warn!(location = %upgraded.location, "device still unreachable after reset");
                sink.emit(
                    ProgressEvent::new(
                        EventKind::VerificationFailed,
                        format!("{} still unreachable after reset", upgraded.location),
                    )
                    .at(&upgraded.location, &upgraded.address),
                );
            }
            outcomes[index] = upgraded;
        }
    }
}

/// Load the directory snapshot and run a sweep with production services.
///
/// This is the entry point both the REST handlers and the CLI reset command
/// call; everything above it is transport.
pub fn execute(
    config: &AppConfig,
    scope: ResetScope,
    timeout_secs: u64,
    sink: &dyn EventSink,
) -> Result<BatchRun, PreconditionError> {
    validate_timeout(timeout_secs)?;
    let credentials = config
        .credentials
        .as_ref()
        .ok_or(PreconditionError::MissingCredentials)?;

    let directory = Directory::load(&config.directory_file)
        .map_err(|e| PreconditionError::Directory(format!("{e:#}")))?;

    let prober = PingProber::new(config.probe_count);
    let remediator = Ssh2Remediator::new(
        Duration::from_secs(config.command_settle_secs),
        Duration::from_secs(config.cycle_settle_secs),
    );
    let runner = BatchRunner::new(&prober, &remediator, Some(credentials));
    runner.run(
        &directory,
        &BatchOptions::from_config(config, scope, timeout_secs),
        sink,
    )
}

/// Single-location variant of [`execute`], probe gate skipped.
pub fn execute_single(
    config: &AppConfig,
    location: &str,
    timeout_secs: u64,
    sink: &dyn EventSink,
) -> Result<AttemptOutcome, PreconditionError> {
    validate_timeout(timeout_secs)?;
    let credentials = config
        .credentials
        .as_ref()
        .ok_or(PreconditionError::MissingCredentials)?;

    let directory = Directory::load(&config.directory_file)
        .map_err(|e| PreconditionError::Directory(format!("{e:#}")))?;

    let prober = PingProber::new(config.probe_count);
    let remediator = Ssh2Remediator::new(
        Duration::from_secs(config.command_settle_secs),
        Duration::from_secs(config.cycle_settle_secs),
    );
    let runner = BatchRunner::new(&prober, &remediator, Some(credentials));
    runner.reset_location(
        &directory,
        location,
        &BatchOptions::from_config(config, ResetScope::Full, timeout_secs),
        sink,
    )
}
