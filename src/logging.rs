//! Structured logging for tests that use the harness.
//!
//! Nothing in the crate installs a subscriber on its own. Call [`init`] at the start of a test (or in a
//! `harness = false` main) to see the harness's `tracing` events:
//!
//! ```text
//! TESTEXEC_LOG=testexec=debug cargo test
//! ```

use tracing_subscriber::EnvFilter;

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_ENV: &str = "TESTEXEC_LOG";

/// Filter used when `TESTEXEC_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// Install a fmt subscriber that writes through libtest's output capture.
///
/// Safe to call from every test: only the first call in a process installs the subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_test_writer()
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
