use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// How a re-executed test failed to finish cleanly.
///
/// These are the outcomes a test is expected to assert on, so none of them are treated as a local failure.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to locate the test executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while capturing child output: {0}")]
    Io(#[from] io::Error),

    /// The child exited on its own with a non-zero code.
    #[error("exit status {0}")]
    Exit(i32),

    /// The child was terminated by a signal (Unix only).
    #[error("signal: {0}")]
    Signaled(i32),

    /// The child exited successfully but the test filter selected nothing.
    #[error("no test named {0:?} ran in the child process")]
    NoMatchingTest(String),

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Canceled,
}

impl ExecError {
    /// Exit code for [`ExecError::Exit`], `None` for everything else.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Exit(code) => Some(*code),
            _ => None,
        }
    }
}
