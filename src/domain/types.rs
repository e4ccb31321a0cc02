use serde::{Deserialize, Serialize};

/// Final classification of one location's fate within a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Probe answered; the port was left alone.
    ReachableNoAction,
    /// Power-cycle completed; recovery not yet verified.
    ResetSucceeded,
    /// Power-cycle completed and the device answered the verification probe.
    ResetVerified,
    /// Power-cycle completed but the device stayed dark after the settle delay.
    ResetUnreachableAfter,
    ResetFailed,
    /// The location has no port assignment in the directory.
    ConfigurationMissing,
    /// An unclassified error interrupted processing for this location.
    ProcessingError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub location: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub outcome: OutcomeKind,
    pub detail: String,
}

impl AttemptOutcome {
    pub fn new(location: &str, address: &str, outcome: OutcomeKind, detail: String) -> Self {
        Self {
            location: location.to_string(),
            address: address.to_string(),
            port: None,
            outcome,
            detail,
        }
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.port = Some(port.to_string());
        self
    }

    /// Upgraded copy carrying the verification result. The sweep-time record
    /// itself is never mutated; the event stream already reported it, which
    /// keeps the before/after audit trail intact.
    pub fn with_verification(&self, reachable: bool) -> Self {
        let mut upgraded = self.clone();
        if reachable {
            upgraded.outcome = OutcomeKind::ResetVerified;
            upgraded.detail = format!("{}; device reachable after settle", self.detail);
        } else {
            upgraded.outcome = OutcomeKind::ResetUnreachableAfter;
            upgraded.detail = format!("{}; device still unreachable after settle", self.detail);
        }
        upgraded
    }
}

/// Aggregate over one batch execution. Lives only for the run; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub success: bool,
    pub total: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub verified: usize,
    pub unverified: usize,
    pub outcomes: Vec<AttemptOutcome>,
}

impl BatchRun {
    /// Build the aggregate from per-location outcomes.
    ///
    /// `counted` is the full outcome set the counts come from; `outcomes` is
    /// the reported detail list, which a down-only run scopes to the targets
    /// that actually failed the probe.
    pub fn from_outcomes(
        total: usize,
        counted: &[AttemptOutcome],
        outcomes: Vec<AttemptOutcome>,
    ) -> Self {
        let count = |kind: OutcomeKind| counted.iter().filter(|o| o.outcome == kind).count();

        let reachable = count(OutcomeKind::ReachableNoAction);
        let verified = count(OutcomeKind::ResetVerified);
        let succeeded = verified
            + count(OutcomeKind::ResetSucceeded)
            + count(OutcomeKind::ResetUnreachableAfter);
        let failed = count(OutcomeKind::ResetFailed);

        Self {
            success: succeeded > 0 || succeeded + failed == 0,
            total,
            reachable,
            unreachable: total - reachable - count(OutcomeKind::ProcessingError),
            attempted: succeeded + failed,
            succeeded,
            failed,
            verified,
            unverified: succeeded - verified,
            outcomes,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} checked: {} reachable, {} reset attempted, {} succeeded ({} verified), {} failed",
            self.total, self.reachable, self.attempted, self.succeeded, self.verified, self.failed
        )
    }
}

/// One row of the reachability snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityEntry {
    pub location: String,
    pub address: String,
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonHealth {
    pub version: String,
    pub uptime_secs: u64,
    pub directory_file: String,
    pub credentials_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OutcomeKind) -> AttemptOutcome {
        AttemptOutcome::new("Lobby", "10.0.0.1", kind, "detail".to_string())
    }

    #[test]
    fn verification_upgrade_is_a_copy() {
        let original = outcome(OutcomeKind::ResetSucceeded);
        let upgraded = original.with_verification(true);

        assert_eq!(original.outcome, OutcomeKind::ResetSucceeded);
        assert_eq!(upgraded.outcome, OutcomeKind::ResetVerified);

        let dark = original.with_verification(false);
        assert_eq!(dark.outcome, OutcomeKind::ResetUnreachableAfter);
        assert_eq!(original.detail, "detail");
    }

    #[test]
    fn aggregate_counts_partition_outcomes() {
        let all = vec![
            outcome(OutcomeKind::ReachableNoAction),
            outcome(OutcomeKind::ResetVerified),
            outcome(OutcomeKind::ResetFailed),
            outcome(OutcomeKind::ResetUnreachableAfter),
        ];
        let run = BatchRun::from_outcomes(4, &all, all.clone());

        assert!(run.success);
        assert_eq!(run.reachable, 1);
        assert_eq!(run.unreachable, 3);
        assert_eq!(run.attempted, 3);
        assert_eq!(run.succeeded, 2);
        assert_eq!(run.failed, 1);
        assert_eq!(run.verified, 1);
        assert_eq!(run.unverified, 1);
    }

    #[test]
    fn batch_with_no_remediation_needed_succeeds() {
        let all = vec![
            outcome(OutcomeKind::ReachableNoAction),
            outcome(OutcomeKind::ReachableNoAction),
        ];
        let run = BatchRun::from_outcomes(2, &all, all.clone());
        assert!(run.success);
        assert_eq!(run.attempted, 0);
    }

    #[test]
    fn batch_where_every_attempt_failed_is_failed() {
        let all = vec![
            outcome(OutcomeKind::ReachableNoAction),
            outcome(OutcomeKind::ResetFailed),
        ];
        let run = BatchRun::from_outcomes(2, &all, all.clone());
        assert!(!run.success);
        // Per-target detail is still present, partial failure stays visible.
        assert_eq!(run.outcomes.len(), 2);
    }

    #[test]
    fn outcome_kind_serializes_snake_case() {
        let json = serde_json::to_string(&OutcomeKind::ReachableNoAction).unwrap();
        assert_eq!(json, "\"reachable_no_action\"");
        let json = serde_json::to_string(&OutcomeKind::ResetUnreachableAfter).unwrap();
        assert_eq!(json, "\"reset_unreachable_after\"");
    }
}
