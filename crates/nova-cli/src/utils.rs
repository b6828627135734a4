//! Utility functions for the CLI

use crate::error::{CliError, CliResult};
use colored::{ColoredString, Colorize};
use tracing_subscriber::EnvFilter;

/// Set to `1`/`true` for JSON log lines.
pub const JSON_LOGS_ENV: &str = "NOVA_JSON_LOGS";

fn json_logs_enabled() -> bool {
    std::env::var(JSON_LOGS_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Initialize tracing. Logs go to stderr so command output stays pipeable.
pub fn init_tracing(verbose: bool) -> CliResult<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json_logs_enabled() {
        builder.json().try_init()
    } else {
        builder.with_thread_ids(false).with_file(false).try_init()
    };
    result.map_err(|e| CliError::General(format!("Failed to set tracing subscriber: {}", e)))
}

/// Utility for colored console output
pub struct ColoredOutput;

impl ColoredOutput {
    pub fn success(msg: &str) -> ColoredString {
        msg.green().bold()
    }

    pub fn error(msg: &str) -> ColoredString {
        msg.red().bold()
    }

    pub fn warning(msg: &str) -> ColoredString {
        msg.yellow().bold()
    }

    pub fn dim(msg: &str) -> ColoredString {
        msg.dimmed()
    }

    pub fn highlight(msg: &str) -> ColoredString {
        msg.cyan().bold()
    }
}
