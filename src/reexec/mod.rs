//! Re-executing the test binary to observe functions that exit or hang
//!
//! ## Protocol
//!
//! A test calls [`Reexec::invoke`] (or [`Reexec::invoke_and_capture`]) with its own exact name and a target
//! function. Both the outer test run and the child run the same test body up to that call:
//!
//! - **Outer run** (no marker in the environment): returns a [`ReexecCommand`] for the current executable, filtered
//!   to only this test, with `TESTEXEC_WANT_HELPER_PROCESS=1` added to the child's environment.
//! - **Child run** (marker present): calls the target function and then exits with code 0, unless the target
//!   already terminated the process itself.
//!
//! Extra arguments for the target travel through `TESTEXEC_ARGS` and are read back with [`args`].
//!
//! ## Guard
//!
//! Each test name may be used once per process. The [`Reexec`] registry records names under a lock held only for
//! the check-and-mark step, so children of different tests run concurrently.

mod command;
mod context;
mod error;
mod filter;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub use command::{Captured, ReexecChild, ReexecCommand, SplitOutput};
pub use context::Context;
pub use error::ExecError;
pub use filter::{FilterStyle, anchored_pattern};

/// Environment marker telling a child process to run the target function.
pub const HELPER_ENV: &str = "TESTEXEC_WANT_HELPER_PROCESS";

/// Environment variable carrying the caller's extra arguments as a JSON array of strings.
pub const ARGS_ENV: &str = "TESTEXEC_ARGS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Configuration
// ============================================================================

/// How children are built and waited on.
#[derive(Debug, Clone)]
pub struct ReexecConfig {
    filter: FilterStyle,
    harness_args: Vec<String>,
    program: Option<PathBuf>,
    poll_interval: Duration,
}

impl Default for ReexecConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReexecConfig {
    /// Libtest filtering, the current executable, no extra harness flags.
    pub const fn new() -> Self {
        Self {
            filter: FilterStyle::Libtest,
            harness_args: Vec::new(),
            program: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn filter(mut self, filter: FilterStyle) -> Self {
        self.filter = filter;
        self
    }

    /// Flag for the test framework, placed after the name filter and before caller arguments.
    pub fn harness_arg(mut self, arg: impl Into<String>) -> Self {
        self.harness_args.push(arg.into());
        self
    }

    /// Run this program instead of the current executable.
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// How often a waiting parent checks its [`Context`]. Clamped to at least one millisecond.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide registry of tests that already re-executed themselves.
///
/// Declare one per test binary and share it between tests:
///
/// ```
/// use testexec::Reexec;
///
/// static REEXEC: Reexec = Reexec::new();
/// ```
#[derive(Debug)]
pub struct Reexec {
    config: ReexecConfig,
    called: Mutex<BTreeSet<String>>,
}

impl Default for Reexec {
    fn default() -> Self {
        Self::new()
    }
}

impl Reexec {
    pub const fn new() -> Self {
        Self::with_config(ReexecConfig::new())
    }

    pub const fn with_config(config: ReexecConfig) -> Self {
        Self {
            config,
            called: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn config(&self) -> &ReexecConfig {
        &self.config
    }

    /// Prepare a child that runs only `test`, or run `target` and exit if this is the child.
    ///
    /// `test` must be the exact name the test framework knows the calling test by (for libtest, the path below the
    /// crate root, e.g. `cli::tests::help_exits_zero`).
    ///
    /// # Panics
    ///
    /// If `test` was already passed to this registry in this process.
    #[tracing::instrument(skip_all, fields(test = %test))]
    pub fn invoke<F, I, S>(&self, ctx: &Context, test: &str, target: F, args: I) -> ReexecCommand
    where
        F: FnOnce(),
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mark_called(test);

        if is_helper_process() {
            tracing::debug!("running target in child");
            target();
            std::process::exit(0);
        }

        let extra: Vec<String> = args.into_iter().map(Into::into).collect();
        let command = self.build_command(ctx, test, extra);
        tracing::debug!(args = ?command.args(), "prepared child");
        command
    }

    /// [`Reexec::invoke`] followed by [`ReexecCommand::combined_output`].
    pub fn invoke_and_capture<F, I, S>(&self, ctx: &Context, test: &str, target: F, args: I) -> Captured
    where
        F: FnOnce(),
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invoke(ctx, test, target, args).combined_output()
    }

    fn mark_called(&self, test: &str) {
        let first = {
            let mut called = self.called.lock().unwrap_or_else(PoisonError::into_inner);
            called.insert(test.to_string())
        };
        if !first {
            panic!("Reexec::invoke can be used only once per test (called twice for {test:?})");
        }
    }

    fn build_command(&self, ctx: &Context, test: &str, extra: Vec<String>) -> ReexecCommand {
        let filter = self.config.filter;
        let mut args = filter.filter_args(test);
        args.extend(self.config.harness_args.iter().cloned());
        if filter.passes_args_on_command_line() {
            args.extend(extra.iter().cloned());
        }

        // Serializing a list of strings cannot fail.
        let encoded = serde_json::to_string(&extra).unwrap_or_else(|_| "[]".to_string());
        let envs = vec![(HELPER_ENV.to_string(), "1".to_string()), (ARGS_ENV.to_string(), encoded)];

        ReexecCommand {
            test: test.to_string(),
            program: self.config.program.clone(),
            args,
            envs,
            ctx: ctx.clone(),
            filter,
            poll_interval: self.config.poll_interval,
        }
    }
}

// ============================================================================
// Child-side helpers
// ============================================================================

/// Whether this process was started by [`Reexec::invoke`].
pub fn is_helper_process() -> bool {
    std::env::var(HELPER_ENV).is_ok_and(|value| value == "1")
}

/// Argument vector for the target function's own parser.
///
/// In a child this is the program name followed by the extra arguments given to [`Reexec::invoke`]; elsewhere it
/// is the process's real arguments.
pub fn args() -> Vec<String> {
    let mut real = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let Ok(encoded) = std::env::var(ARGS_ENV) else {
        return real.collect();
    };

    let argv0 = real.next().unwrap_or_default();
    match serde_json::from_str::<Vec<String>>(&encoded) {
        Ok(extra) => std::iter::once(argv0).chain(extra).collect(),
        Err(err) => {
            tracing::warn!(%err, "ignoring malformed {ARGS_ENV}");
            vec![argv0]
        }
    }
}

/// Name of the libtest test running on this thread.
///
/// Libtest names each test thread after its test. Returns `None` on the main thread or any unnamed thread.
pub fn current_test_name() -> Option<String> {
    let current = std::thread::current();
    match current.name() {
        Some("main") | None => None,
        Some(name) => Some(name.to_string()),
    }
}
