//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the global stderr subscriber
//! - [`capture_logs`] installs a thread-local capturing subscriber for tests
//!
//! Every crate in the workspace logs through `tracing` macros with
//! structured fields (`session_id`, `stage`, `event`), so a deployment can
//! filter a single connection with `RUST_LOG` directives.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` wins over `level` when set. With `json` the output is one
/// JSON object per line. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already installed
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
