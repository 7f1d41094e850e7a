//! File logging.
//!
//! The terminal belongs to the paced chat output, so log lines go to
//! `$WAIFU_HOME/logs/waifu.log` through a non-blocking writer.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub const ENV_LOG: &str = "WAIFU_LOG";
pub const LOG_FILE_NAME: &str = "waifu.log";
const DEFAULT_DIRECTIVE: &str = "warn";

/// Picks the filter directive: `--debug` > `WAIFU_LOG` > config > `warn`.
pub fn filter_directive(debug: bool, env_value: Option<&str>, config_level: Option<&str>) -> String {
    if debug {
        return "debug".to_string();
    }
    [env_value, config_level]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_string()
}

/// Installs the global subscriber writing to `dir/waifu.log`.
///
/// Keep the returned guard alive until exit; dropping it flushes pending
/// lines.
///
/// # Errors
/// Returns an error if the log directory cannot be created, the directive
/// does not parse, or a subscriber is already installed.
pub fn init(dir: &Path, directive: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let filter = EnvFilter::try_new(directive)
        .with_context(|| format!("Invalid log filter '{directive}'"))?;

    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_precedence() {
        assert_eq!(filter_directive(true, Some("trace"), Some("info")), "debug");
        assert_eq!(filter_directive(false, Some("trace"), Some("info")), "trace");
        assert_eq!(filter_directive(false, None, Some("info")), "info");
        assert_eq!(filter_directive(false, Some("  "), None), "warn");
        assert_eq!(filter_directive(false, None, None), "warn");
    }
}
