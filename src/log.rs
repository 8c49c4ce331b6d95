//! Structured logging for weave.
//!
//! Log levels:
//! - ERROR: Worker tasks that could not be joined, executor panics
//! - WARN: Rejected registrations, construction failures, timeouts, aborted batches
//! - INFO: Batch start, level dispatch, batch completion
//! - DEBUG: Per-task outcomes, cache fills, dropped dependency-only nodes
//! - TRACE: Unused by the crate itself
//!
//! Debug mode can be enabled with the `debug` argument or `WEAVE_DEBUG=1`.
//! A `WEAVE_LOG` filter directive (e.g. `weave=trace`) overrides both.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, OnceLock};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a full filter directive.
pub const LOG_ENV: &str = "WEAVE_LOG";

/// Environment variable that switches on debug output.
pub const DEBUG_ENV: &str = "WEAVE_DEBUG";

static INIT: Once = Once::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging to ~/.weave/weave.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Only the first call installs a subscriber; later calls do nothing. If no
/// home directory is available, or the log file cannot be created, output
/// goes to stderr.
pub fn init_with_debug(debug: bool) {
    INIT.call_once(|| {
        let env_debug = std::env::var(DEBUG_ENV)
            .map(|v| debug_flag(&v))
            .unwrap_or(false);
        let debug_enabled = debug || env_debug;
        DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true);

        // Truncate the file on startup
        match open_log_file() {
            Some((path, file)) => {
                let installed = builder
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .try_init();
                // Err means the host application installed its own subscriber.
                if installed.is_ok() {
                    LOG_PATH.set(path).ok();
                }
            }
            None => {
                let _ = builder.with_writer(std::io::stderr).try_init();
            }
        }
    });
}

fn open_log_file() -> Option<(PathBuf, File)> {
    let dir = dirs::home_dir()?.join(".weave");
    std::fs::create_dir_all(&dir).ok()?;
    let path = dir.join("weave.log");
    let file = File::create(&path).ok()?;
    Some((path, file))
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Path of the log file, once logging writes to one.
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}

fn debug_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "weave=debug,info"
    } else {
        "info"
    }
}
