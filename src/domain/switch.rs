//! Remote PoE port power-cycling over SSH.
//!
//! One attempt walks a fixed sequence: connect and authenticate, disable
//! power on the port, pause, re-enable, then a best-effort local status
//! query. Each step failure maps to a distinct [`SwitchError`] variant —
//! operators react differently to an auth rejection than to a refused
//! connection, so the classification is part of the contract. The session
//! is closed on every exit path.
//!
//! Interactive command pacing uses fixed settle intervals rather than echo
//! parsing: switch paging and prompt behavior is too unreliable to drive
//! flow control from.

use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::{Channel, Session};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SshCredentials {
    pub username: String,
    pub password: String,
    pub port: u16,
}

// The secret must never reach logs, not even through a stray `{:?}`.
impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// One remediation attempt's coordinates. Built per attempt, discarded after.
#[derive(Debug, Clone)]
pub struct RemediationTarget {
    pub address: String,
    pub credentials: SshCredentials,
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("authentication rejected by {address}")]
    AuthRejected { address: String },
    #[error("SSH protocol error on {address}: {detail}")]
    Protocol { address: String, detail: String },
    #[error("connection to {address} timed out after {timeout_secs}s")]
    ConnectTimeout { address: String, timeout_secs: u64 },
    #[error("connection to {address} refused")]
    ConnectRefused { address: String },
    #[error("cannot resolve address {address}")]
    Unresolvable { address: String },
    #[error("remote session error on {address}: {detail}")]
    Session { address: String, detail: String },
}

impl SwitchError {
    /// Stable machine-readable tag for response payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchError::AuthRejected { .. } => "auth_rejected",
            SwitchError::Protocol { .. } => "protocol_error",
            SwitchError::ConnectTimeout { .. } => "connect_timeout",
            SwitchError::ConnectRefused { .. } => "connect_refused",
            SwitchError::Unresolvable { .. } => "unresolvable",
            SwitchError::Session { .. } => "session_error",
        }
    }
}

/// What a completed cycle observed locally on the switch.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub port_status: Option<String>,
}

/// Seam the orchestrator remediates through; tests substitute fakes.
pub trait PortRemediator: Send + Sync {
    fn cycle_port(&self, target: &RemediationTarget, port: &str) -> Result<CycleReport, SwitchError>;
}

pub struct Ssh2Remediator {
    /// Pause after each interactive command.
    command_settle: Duration,
    /// Pause between the disable and enable halves of the cycle.
    cycle_settle: Duration,
}

impl Ssh2Remediator {
    pub fn new(command_settle: Duration, cycle_settle: Duration) -> Self {
        Self {
            command_settle,
            cycle_settle,
        }
    }
}

impl Default for Ssh2Remediator {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(3))
    }
}

impl PortRemediator for Ssh2Remediator {
    fn cycle_port(&self, target: &RemediationTarget, port: &str) -> Result<CycleReport, SwitchError> {
        let session = connect(target)?;
        info!(address = %target.address, port = %port, "connected, cycling port");

        let result = self.run_cycle(&session, target, port);

        // Close on every exit path; a failed disconnect is not worth more
        // than a debug line at this point.
        if let Err(e) = session.disconnect(None, "port cycle finished", None) {
            debug!(address = %target.address, error = %e, "disconnect failed");
        }
        result
    }
}

impl Ssh2Remediator {
    fn run_cycle(
        &self,
        session: &Session,
        target: &RemediationTarget,
        port: &str,
    ) -> Result<CycleReport, SwitchError> {
        let iface = interface_name(port);
        let mut shell = open_shell(session, target)?;
        std::thread::sleep(self.command_settle);

        debug!(address = %target.address, interface = %iface, "disabling power");
        for command in disable_script(&iface) {
            self.send_command(session, &mut shell, target, &command)?;
        }

        std::thread::sleep(self.cycle_settle);

        debug!(address = %target.address, interface = %iface, "re-enabling power");
        for command in enable_script(&iface) {
            self.send_command(session, &mut shell, target, &command)?;
        }

        let _ = shell.close();

        // Best effort only: an empty status line is not a failure.
        let port_status = query_port_status(session, &iface);

        Ok(CycleReport { port_status })
    }

    fn send_command(
        &self,
        session: &Session,
        shell: &mut Channel,
        target: &RemediationTarget,
        command: &str,
    ) -> Result<(), SwitchError> {
        shell
            .write_all(format!("{command}\n").as_bytes())
            .and_then(|_| shell.flush())
            .map_err(|e| SwitchError::Session {
                address: target.address.clone(),
                detail: format!("sending '{command}': {e}"),
            })?;

        std::thread::sleep(self.command_settle);

        let echoed = drain_output(session, shell);
        if !echoed.is_empty() {
            debug!(command = %command, output = %echoed.trim(), "switch output");
        }
        Ok(())
    }
}

fn connect(target: &RemediationTarget) -> Result<Session, SwitchError> {
    let endpoint = format!("{}:{}", target.address, target.credentials.port);
    let addr = endpoint
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| SwitchError::Unresolvable {
            address: target.address.clone(),
        })?;

    let timeout = Duration::from_secs(target.timeout_secs);
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| classify_connect_error(e.kind(), target))?;
    let _ = tcp.set_read_timeout(Some(timeout));
    let _ = tcp.set_write_timeout(Some(timeout));

    let mut session = Session::new().map_err(|e| SwitchError::Protocol {
        address: target.address.clone(),
        detail: e.to_string(),
    })?;
    session.set_tcp_stream(tcp);
    session.set_timeout((target.timeout_secs * 1000) as u32);

    session.handshake().map_err(|e| SwitchError::Protocol {
        address: target.address.clone(),
        detail: e.to_string(),
    })?;

    session
        .userauth_password(&target.credentials.username, &target.credentials.password)
        .map_err(|_| SwitchError::AuthRejected {
            address: target.address.clone(),
        })?;
    if !session.authenticated() {
        return Err(SwitchError::AuthRejected {
            address: target.address.clone(),
        });
    }

    Ok(session)
}

fn classify_connect_error(kind: std::io::ErrorKind, target: &RemediationTarget) -> SwitchError {
    match kind {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            SwitchError::ConnectTimeout {
                address: target.address.clone(),
                timeout_secs: target.timeout_secs,
            }
        }
        std::io::ErrorKind::ConnectionRefused => SwitchError::ConnectRefused {
            address: target.address.clone(),
        },
        other => SwitchError::Session {
            address: target.address.clone(),
            detail: format!("connect failed: {other}"),
        },
    }
}

fn open_shell(session: &Session, target: &RemediationTarget) -> Result<Channel, SwitchError> {
    let session_err = |e: ssh2::Error| SwitchError::Session {
        address: target.address.clone(),
        detail: e.to_string(),
    };
    let mut channel = session.channel_session().map_err(session_err)?;
    channel.request_pty("vt100", None, None).map_err(session_err)?;
    channel.shell().map_err(session_err)?;
    Ok(channel)
}

/// Read whatever the switch has buffered without blocking on more.
fn drain_output(session: &Session, channel: &mut Channel) -> String {
    let mut collected = String::new();
    let mut buf = [0u8; 4096];

    session.set_blocking(false);
    loop {
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => collected.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(_) => break,
        }
    }
    session.set_blocking(true);

    collected
}

fn query_port_status(session: &Session, iface: &str) -> Option<String> {
    let mut channel = session.channel_session().ok()?;
    channel.exec(&format!("show poe interface {iface}")).ok()?;

    let mut output = String::new();
    let _ = channel.read_to_string(&mut output);
    let _ = channel.wait_close();

    let trimmed = output.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn interface_name(port: &str) -> String {
    format!("ge-0/0/{port}")
}

fn disable_script(iface: &str) -> [String; 3] {
    [
        "edit".to_string(),
        format!("set poe interface {iface} disable"),
        "commit".to_string(),
    ]
}

fn enable_script(iface: &str) -> [String; 3] {
    [
        "edit".to_string(),
        format!("delete poe interface {iface} disable"),
        "commit".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RemediationTarget {
        RemediationTarget {
            address: "10.0.1.1".to_string(),
            credentials: SshCredentials {
                username: "ops".to_string(),
                password: "hunter2".to_string(),
                port: 22,
            },
            timeout_secs: 10,
        }
    }

    #[test]
    fn scripts_disable_then_reenable_the_same_interface() {
        let disable = disable_script("ge-0/0/16");
        assert_eq!(disable[1], "set poe interface ge-0/0/16 disable");
        assert_eq!(disable[2], "commit");

        let enable = enable_script("ge-0/0/16");
        assert_eq!(enable[1], "delete poe interface ge-0/0/16 disable");
        assert_eq!(enable[2], "commit");
    }

    #[test]
    fn normalized_ports_map_to_interface_names() {
        assert_eq!(interface_name("16"), "ge-0/0/16");
    }

    #[test]
    fn connect_errors_classify_by_io_kind() {
        let t = target();
        assert!(matches!(
            classify_connect_error(std::io::ErrorKind::TimedOut, &t),
            SwitchError::ConnectTimeout { .. }
        ));
        assert!(matches!(
            classify_connect_error(std::io::ErrorKind::ConnectionRefused, &t),
            SwitchError::ConnectRefused { .. }
        ));
        assert!(matches!(
            classify_connect_error(std::io::ErrorKind::BrokenPipe, &t),
            SwitchError::Session { .. }
        ));
    }

    #[test]
    fn error_kinds_are_stable_tags() {
        let t = target();
        let cases: Vec<(SwitchError, &str)> = vec![
            (
                SwitchError::AuthRejected {
                    address: t.address.clone(),
                },
                "auth_rejected",
            ),
            (
                SwitchError::ConnectTimeout {
                    address: t.address.clone(),
                    timeout_secs: 10,
                },
                "connect_timeout",
            ),
            (
                SwitchError::Unresolvable {
                    address: t.address.clone(),
                },
                "unresolvable",
            ),
        ];
        for (error, kind) in cases {
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn credentials_debug_never_prints_the_secret() {
        let t = target();
        let rendered = format!("{:?}", t.credentials);
        assert!(rendered.contains("ops"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn unresolvable_hosts_fail_before_any_session_work() {
        let mut t = target();
        t.address = "definitely-not-a-real-switch.invalid".to_string();
        let remediator = Ssh2Remediator::new(Duration::from_millis(1), Duration::from_millis(1));
        match remediator.cycle_port(&t, "16") {
            Err(SwitchError::Unresolvable { address }) => {
                assert_eq!(address, t.address);
            }
            other => panic!("expected Unresolvable, got {other:?}"),
        }
    }
}
