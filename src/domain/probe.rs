//! Reachability probing via the system `ping`.
//!
//! Exit status alone is not trusted: some platforms exit 0 on partial
//! failures and localized builds vary their wording. The child runs with
//! `LC_ALL=C` and a probe only counts as delivered when the exit status is
//! clean AND the output carries a response marker (`ttl=` or `time=`).

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extra wall-clock allowance on top of the ping timeout before the child
/// is killed.
const WAIT_BUFFER_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub address: String,
    pub reachable: bool,
    pub output: String,
}

/// Seam the orchestrator probes through; tests substitute fakes.
pub trait Prober: Send + Sync {
    fn probe(&self, address: &str, timeout_secs: u64) -> bool;
}

pub struct PingProber {
    count: u32,
}

impl PingProber {
    pub fn new(count: u32) -> Self {
        Self { count: count.max(1) }
    }

    /// Probe with the raw output retained, for the ping endpoints.
    pub fn probe_detailed(&self, address: &str, timeout_secs: u64) -> ProbeReport {
        match self.run_ping(address, timeout_secs) {
            Ok((exit_ok, output)) => {
                let reachable = classify(exit_ok, &output);
                debug!(address = %address, reachable, "probe finished");
                ProbeReport {
                    address: address.to_string(),
                    reachable,
                    output,
                }
            }
            Err(e) => {
                // Spawn/read errors and overruns are failed probes, never
                // fatal to the caller.
                debug!(address = %address, error = %e, "probe errored");
                ProbeReport {
                    address: address.to_string(),
                    reachable: false,
                    output: e.to_string(),
                }
            }
        }
    }

    fn run_ping(&self, address: &str, timeout_secs: u64) -> std::io::Result<(bool, String)> {
        let mut child = Command::new("ping")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg(address)
            .env("LC_ALL", "C")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + Duration::from_secs(timeout_secs + WAIT_BUFFER_SECS);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("ping to {address} overran its {timeout_secs}s window"),
                ));
            }
            std::thread::sleep(Duration::from_millis(100));
        };

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            let _ = stdout.read_to_string(&mut output);
        }
        Ok((status.success(), output))
    }
}

impl Prober for PingProber {
    fn probe(&self, address: &str, timeout_secs: u64) -> bool {
        self.probe_detailed(address, timeout_secs).reachable
    }
}

/// Delivery requires a clean exit AND a recognized response marker.
fn classify(exit_ok: bool, output: &str) -> bool {
    exit_ok && has_response_marker(output)
}

fn has_response_marker(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("ttl=") || lower.contains("time=")
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str =
        "64 bytes from 10.12.0.5: icmp_seq=1 ttl=64 time=0.32 ms\n\n--- ping statistics ---\n";

    #[test]
    fn reply_markers_are_recognized() {
        assert!(has_response_marker(REPLY));
        assert!(has_response_marker("reply: TTL=128"));
        assert!(has_response_marker("round-trip min/avg time=1.2ms"));
        assert!(!has_response_marker("Request timeout for icmp_seq 0"));
        assert!(!has_response_marker(""));
    }

    #[test]
    fn delivery_needs_both_exit_and_marker() {
        assert!(classify(true, REPLY));
        // Clean exit with no reply text is not a delivery.
        assert!(!classify(true, "3 packets transmitted, 0 received"));
        // Reply text with a failing exit is not a delivery either.
        assert!(!classify(false, REPLY));
    }

    #[test]
    fn probe_count_never_drops_to_zero() {
        let prober = PingProber::new(0);
        assert_eq!(prober.count, 1);
    }
}
