#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! testexec: test support for code that exits the process or never returns
//!
//! The crate provides two independent facilities:
//!
//! - [`reexec`] - run a function that calls `std::process::exit` (or blocks forever, or aborts) in a child copy of
//!   the current test binary, scoped to the calling test, and assert on its exit status and combined output.
//! - [`lifecycle`] - ordered setup slots, teardown callbacks and a fatal-exit helper for `harness = false` test
//!   targets whose `main` wraps the whole suite.
//!
//! ## Example
//!
//! ```no_run
//! use testexec::{Context, Reexec};
//!
//! static REEXEC: Reexec = Reexec::new();
//!
//! fn exits_with_usage_error() {
//!     eprintln!("usage: tool <FILE>");
//!     std::process::exit(2);
//! }
//!
//! // Inside a #[test] named `reports_usage`:
//! fn reports_usage() {
//!     let captured = REEXEC.invoke_and_capture(&Context::background(), "reports_usage", exits_with_usage_error, ["-x"]);
//!     assert_eq!(captured.exit_code(), Some(2));
//!     assert!(captured.output.contains("usage:"));
//! }
//! ```
//!
//! ## Panic Policy
//!
//! - **Library code**: child outcomes (non-zero exit, spawn failure, cancellation) are returned as [`ExecError`]
//!   values. `unwrap`/`expect` are denied outside tests.
//! - **Usage errors**: invoking the harness twice for one test and bad setup slots panic. They are defects in the
//!   calling test, not runtime conditions.

pub mod lifecycle;
pub mod logging;
pub mod reexec;

pub use lifecycle::{ExitCode, Lifecycle, LifecycleError, SETUP_SLOTS};
pub use reexec::{
    ARGS_ENV, Captured, Context, ExecError, FilterStyle, HELPER_ENV, Reexec, ReexecChild, ReexecCommand, ReexecConfig,
    SplitOutput, args, current_test_name, is_helper_process,
};
