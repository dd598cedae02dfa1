//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `-v` count on the command line
//! 2. `TENSIDE_LOG` environment variable (any `EnvFilter` directive)
//! 3. `info`
//!
//! Logs go to stderr; stdout carries only JSON envelopes.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "TENSIDE_LOG";

pub fn init_logging(verbosity: u8) -> Result<()> {
    fmt()
        .with_env_filter(filter_for(verbosity, std::env::var(LOG_ENV).ok().as_deref()))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("initialising logging: {e}"))
}

fn filter_for(verbosity: u8, env: Option<&str>) -> EnvFilter {
    match verbosity {
        0 => env
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}
