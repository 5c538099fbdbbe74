//! Ordered setup and teardown for a whole test suite
//!
//! Intended for `harness = false` test targets, whose `main` owns the run:
//!
//! ```no_run
//! use testexec::{ExitCode, Lifecycle};
//!
//! static LIFECYCLE: Lifecycle = Lifecycle::new();
//!
//! fn main() {
//!     LIFECYCLE.register_setup(1, || println!("start fixtures"));
//!     LIFECYCLE.register_setup(0, || println!("prepare env"));
//!     LIFECYCLE.register_teardown(|| println!("stop fixtures"));
//!     LIFECYCLE.run_suite(|| ExitCode::SUCCESS);
//! }
//! ```
//!
//! Code that wants to bail out early calls [`Lifecycle::fatal`] instead of `std::process::exit`, so teardown still
//! runs.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Number of ordered setup slots.
pub const SETUP_SLOTS: usize = 8;

type Callback = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Exit codes and errors
// ============================================================================

/// Process exit code produced by a suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<bool> for ExitCode {
    /// `true` means every test passed.
    fn from(passed: bool) -> Self {
        if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE }
    }
}

/// Mistakes in registering setup callbacks.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("setup slot {slot} is invalid, valid values are 0..={max}")]
    SlotOutOfRange { slot: usize, max: usize },

    #[error("setup slot {0} is already set")]
    SlotTaken(usize),
}

// ============================================================================
// Registry
// ============================================================================

enum Slot {
    Empty,
    Pending(Callback),
    Done,
}

struct State {
    setup: [Slot; SETUP_SLOTS],
    teardown: Vec<Callback>,
    reporter: Option<Callback>,
}

/// Setup slots, teardown callbacks and the reporting hook of one test binary.
///
/// Callbacks always run without the internal lock held. A teardown callback may register further teardowns; they run
/// in the same [`Lifecycle::run_teardown`] call, after the callbacks already queued.
pub struct Lifecycle {
    state: Mutex<State>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let pending: Vec<usize> = state
            .setup
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Pending(_)))
            .map(|(idx, _)| idx)
            .collect();
        f.debug_struct("Lifecycle")
            .field("pending_setup", &pending)
            .field("teardown", &state.teardown.len())
            .field("reporter", &state.reporter.is_some())
            .finish()
    }
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                setup: [const { Slot::Empty }; SETUP_SLOTS],
                teardown: Vec::new(),
                reporter: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign `f` to setup slot `slot`.
    ///
    /// # Panics
    ///
    /// If `slot >= SETUP_SLOTS` or the slot was already assigned.
    pub fn register_setup(&self, slot: usize, f: impl FnOnce() + Send + 'static) {
        if let Err(err) = self.try_register_setup(slot, f) {
            panic!("{err}");
        }
    }

    pub fn try_register_setup(&self, slot: usize, f: impl FnOnce() + Send + 'static) -> Result<(), LifecycleError> {
        if slot >= SETUP_SLOTS {
            return Err(LifecycleError::SlotOutOfRange {
                slot,
                max: SETUP_SLOTS - 1,
            });
        }
        let mut state = self.lock();
        if !matches!(state.setup[slot], Slot::Empty) {
            return Err(LifecycleError::SlotTaken(slot));
        }
        state.setup[slot] = Slot::Pending(Box::new(f));
        Ok(())
    }

    /// Append `f` to the teardown list.
    pub fn register_teardown(&self, f: impl FnOnce() + Send + 'static) {
        self.lock().teardown.push(Box::new(f));
    }

    /// Hook run after the suite runner and before teardown, replacing any earlier one.
    pub fn set_reporter(&self, f: impl FnOnce() + Send + 'static) {
        self.lock().reporter = Some(Box::new(f));
    }

    /// Run every pending setup slot in ascending index order.
    pub fn run_setup(&self) {
        for idx in 0..SETUP_SLOTS {
            let slot = {
                let mut state = self.lock();
                if !matches!(state.setup[idx], Slot::Pending(_)) {
                    continue;
                }
                std::mem::replace(&mut state.setup[idx], Slot::Done)
            };
            if let Slot::Pending(f) = slot {
                tracing::debug!(slot = idx, "running setup");
                f();
            }
        }
    }

    /// Run and forget every registered teardown callback, in registration order, until none are left.
    pub fn run_teardown(&self) {
        loop {
            let callbacks = std::mem::take(&mut self.lock().teardown);
            if callbacks.is_empty() {
                break;
            }
            tracing::debug!(count = callbacks.len(), "running teardown");
            for f in callbacks {
                f();
            }
        }
    }

    fn run_reporter(&self) {
        let reporter = self.lock().reporter.take();
        if let Some(f) = reporter {
            f();
        }
    }

    /// Setup, `runner`, reporter, teardown. Returns the runner's exit code without exiting.
    pub fn run_suite_code<C: Into<ExitCode>>(&self, runner: impl FnOnce() -> C) -> ExitCode {
        self.run_setup();
        let code = runner().into();
        tracing::debug!(code = code.0, "suite finished");
        self.run_reporter();
        self.run_teardown();
        code
    }

    /// Like [`Lifecycle::run_suite_code`], then exit the process with the runner's code.
    pub fn run_suite<C: Into<ExitCode>>(&self, runner: impl FnOnce() -> C) -> ! {
        let code = self.run_suite_code(runner);
        std::process::exit(code.0)
    }

    /// Run teardown, print `message` to stderr and exit with status 1.
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.run_teardown();
        tracing::error!(%message, "fatal");
        eprintln!("{message}");
        std::process::exit(ExitCode::FAILURE.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &str| -> Box<dyn FnOnce() + Send> {
            let sink = sink.clone();
            let label = label.to_string();
            Box::new(move || sink.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn setup_runs_in_slot_order() {
        let lifecycle = Lifecycle::new();
        let (log, make) = recorder();
        lifecycle.register_setup(5, make("five"));
        lifecycle.register_setup(0, make("zero"));
        lifecycle.register_setup(7, make("seven"));
        lifecycle.register_setup(2, make("two"));

        lifecycle.run_setup();
        lifecycle.run_setup();

        assert_eq!(*log.lock().unwrap(), ["zero", "two", "five", "seven"]);
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let lifecycle = Lifecycle::new();
        lifecycle.register_setup(3, || {});
        assert_eq!(lifecycle.try_register_setup(3, || {}), Err(LifecycleError::SlotTaken(3)));

        lifecycle.run_setup();
        assert_eq!(lifecycle.try_register_setup(3, || {}), Err(LifecycleError::SlotTaken(3)));
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle.try_register_setup(SETUP_SLOTS, || {}).unwrap_err();
        assert_eq!(err, LifecycleError::SlotOutOfRange { slot: 8, max: 7 });
        assert_eq!(err.to_string(), "setup slot 8 is invalid, valid values are 0..=7");
    }

    #[test]
    #[should_panic(expected = "setup slot 1 is already set")]
    fn register_setup_panics_on_duplicate() {
        let lifecycle = Lifecycle::new();
        lifecycle.register_setup(1, || {});
        lifecycle.register_setup(1, || {});
    }

    #[test]
    #[should_panic(expected = "is invalid")]
    fn register_setup_panics_out_of_range() {
        Lifecycle::new().register_setup(usize::MAX, || {});
    }

    #[test]
    fn teardown_runs_once_in_registration_order() {
        let lifecycle = Lifecycle::new();
        let (log, make) = recorder();
        lifecycle.register_teardown(make("a"));
        lifecycle.register_teardown(make("b"));
        lifecycle.register_teardown(make("c"));

        lifecycle.run_teardown();
        lifecycle.run_teardown();

        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn suite_order_is_setup_runner_reporter_teardown() {
        let lifecycle = Lifecycle::new();
        let (log, make) = recorder();
        lifecycle.register_teardown(make("teardown"));
        lifecycle.set_reporter(make("report"));
        lifecycle.register_setup(4, make("setup"));

        let runner_log = log.clone();
        let code = lifecycle.run_suite_code(|| {
            runner_log.lock().unwrap().push("runner".to_string());
            3
        });

        assert_eq!(code, ExitCode(3));
        assert_eq!(*log.lock().unwrap(), ["setup", "runner", "report", "teardown"]);
    }

    #[test]
    fn teardown_may_register_more_teardown() {
        let lifecycle = Arc::new(Lifecycle::new());
        let (log, make) = recorder();
        let inner = lifecycle.clone();
        let late = make("late");
        let queued = make("queued");
        lifecycle.register_teardown(move || inner.register_teardown(late));
        lifecycle.register_teardown(queued);

        lifecycle.run_teardown();
        assert_eq!(*log.lock().unwrap(), ["queued", "late"]);

        lifecycle.run_teardown();
        assert_eq!(*log.lock().unwrap(), ["queued", "late"]);
    }

    #[test]
    fn exit_code_from_bool() {
        assert_eq!(ExitCode::from(true), ExitCode::SUCCESS);
        assert_eq!(ExitCode::from(false), ExitCode::FAILURE);
    }
}
