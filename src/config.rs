use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::switch::SshCredentials;

/// Environment variables read exactly once at load time. Credentials are
/// never re-read mid-run and never serialized back out.
pub const ENV_SSH_USERNAME: &str = "SSH_USERNAME";
pub const ENV_SSH_PASSWORD: &str = "SSH_PASSWORD";
pub const ENV_SETTLE_DELAY: &str = "SETTLE_DELAY_SECS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_addr: String,
    pub log_level: String,
    /// Two-sheet workbook mapping locations to device and switch addresses.
    pub directory_file: PathBuf,
    pub ssh_port: u16,
    pub probe_count: u32,
    pub default_timeout_secs: u64,
    /// Batch-wide pause before verification re-probes, once per run.
    pub settle_secs: u64,
    pub inter_target_delay_secs: u64,
    /// Pause after each interactive switch command.
    pub command_settle_secs: u64,
    /// Pause between the disable and enable halves of a port cycle.
    pub cycle_settle_secs: u64,
    #[serde(skip)]
    pub credentials: Option<SshCredentials>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:9300".to_string(),
            log_level: "info".to_string(),
            directory_file: PathBuf::from("config/locations.xlsx"),
            ssh_port: 22,
            probe_count: 3,
            default_timeout_secs: 10,
            settle_secs: 30,
            inter_target_delay_secs: 2,
            command_settle_secs: 2,
            cycle_settle_secs: 3,
            credentials: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("relight").join("config.yaml"))
    }
}

/// Load configuration: defaults, then the YAML file (if present), then
/// `RELIGHT_`-prefixed environment overrides, then credentials and the
/// settle-delay override from the plain environment.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(p) => p.to_path_buf(),
        None => AppConfig::default_path()?,
    };

    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if file.exists() {
        figment = figment.merge(Yaml::file(&file));
    }
    let mut config: AppConfig = figment
        .merge(Env::prefixed("RELIGHT_"))
        .extract()
        .with_context(|| format!("loading configuration from {}", file.display()))?;

    config.credentials = credentials_from_env(config.ssh_port);
    apply_settle_override(&mut config);

    Ok(config)
}

fn credentials_from_env(ssh_port: u16) -> Option<SshCredentials> {
    let username = env::var(ENV_SSH_USERNAME).ok().filter(|v| !v.is_empty())?;
    let password = env::var(ENV_SSH_PASSWORD).ok().filter(|v| !v.is_empty())?;
    Some(SshCredentials {
        username,
        password,
        port: ssh_port,
    })
}

fn apply_settle_override(config: &mut AppConfig) {
    let Ok(raw) = env::var(ENV_SETTLE_DELAY) else {
        return;
    };
    match raw.parse::<u64>() {
        Ok(secs) => config.settle_secs = secs,
        Err(_) => warn!(value = %raw, "ignoring unparseable {ENV_SETTLE_DELAY}"),
    }
}
