//! Deadline and cancellation for a child run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::ExecError;

/// Governs how long a re-executed child may live.
///
/// Clones share the cancellation flag, so a clone handed to another thread can stop a child that is being waited
/// on. A context never imposes a limit on its own; [`Context::background`] waits forever.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    canceled: Arc<AtomicBool>,
}

impl Context {
    /// A context with no deadline that is only done once canceled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            canceled: Arc::default(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Mark this context (and every clone of it) as canceled.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Why the context is done, or `None` while it is still live.
    ///
    /// Cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<ExecError> {
        if self.is_canceled() {
            return Some(ExecError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ExecError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Time left before the deadline, `None` without one.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
