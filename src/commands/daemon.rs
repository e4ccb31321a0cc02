use std::path::Path;

use anyhow::Result;

use crate::config;

pub fn run(
    http_addr: Option<String>,
    log_level: Option<String>,
    config_path: Option<String>,
) -> Result<()> {
    let mut app_config = config::load(config_path.as_deref().map(Path::new))?;

    // CLI flags override config values
    if let Some(addr) = http_addr {
        app_config.http_addr = addr;
    }
    if let Some(level) = log_level {
        app_config.log_level = level;
    }

    // Build tokio runtime explicitly (no #[tokio::main] on fn main)
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(app_config))
}
