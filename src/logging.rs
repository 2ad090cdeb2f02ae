//! Tracing setup.
//!
//! `warden serve` logs to stderr. One-shot commands (`warden ask`, `warden remember`)
//! print JSON on stdout, so their logs go to a file instead.

use std::fs::{self, File};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tracing target used for audit records.
pub const AUDIT_TARGET: &str = "audit";

const LOG_DIR: &str = "db-warden";
const LOG_FILE: &str = "warden.log";

/// `RUST_LOG` when set, otherwise the configured level.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// File logging for one-shot commands. The file is truncated on every run.
///
/// Failing to open the file leaves logging disabled; the command itself still runs.
pub fn init_file_logging(default_level: &str) {
    let path = log_path();
    let file = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| File::create(&path));

    match file {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_level))
            .with_writer(file)
            .with_ansi(false)
            .init(),
        Err(e) => eprintln!("Warning: logging disabled, cannot open {}: {e}", path.display()),
    }
}

pub fn init_stderr_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}

/// `$XDG_STATE_HOME/db-warden/warden.log` where a state directory exists, falling back to
/// the config directory and then the temp directory.
pub fn log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join(LOG_DIR).join(LOG_FILE))
        .unwrap_or_else(|| std::env::temp_dir().join(LOG_FILE))
}
