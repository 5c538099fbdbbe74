//! The child process handle and combined-output capture.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use super::{Context, ExecError, FilterStyle};

/// An unstarted re-invocation of the test binary, scoped to one test.
///
/// The caller decides how to run it: [`ReexecCommand::combined_output`] for the common case,
/// [`ReexecCommand::output`] or [`ReexecCommand::status`] for other capture modes, or [`ReexecCommand::spawn_with`]
/// for full control over stdio. All of these kill the child once the context is done.
#[derive(Debug)]
pub struct ReexecCommand {
    pub(crate) test: String,
    pub(crate) program: Option<PathBuf>,
    pub(crate) args: Vec<String>,
    pub(crate) envs: Vec<(String, String)>,
    pub(crate) ctx: Context,
    pub(crate) filter: FilterStyle,
    pub(crate) poll_interval: Duration,
}

/// Output and termination of a finished child.
#[derive(Debug)]
pub struct Captured {
    /// Interleaved stdout and stderr, decoded lossily.
    pub output: String,
    pub result: Result<(), ExecError>,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// `Some(0)` on success, the child's code if it exited non-zero, `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match &self.result {
            Ok(()) => Some(0),
            Err(err) => err.exit_code(),
        }
    }

    pub fn into_result(self) -> Result<String, ExecError> {
        self.result.map(|()| self.output)
    }
}

impl ReexecCommand {
    /// Name of the test the child is restricted to.
    pub fn test(&self) -> &str {
        &self.test
    }

    /// Explicit program override, `None` to use the current executable.
    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Variables added to the inherited environment.
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Build the `std::process::Command` without starting it.
    ///
    /// The context is dropped here: a child started from the returned command is never killed on cancellation or
    /// deadline. Use [`ReexecCommand::spawn_with`] to configure stdio yourself and keep the context.
    pub fn into_command(self) -> Result<Command, ExecError> {
        self.build()
    }

    /// Start the child with inherited stdout/stderr and a null stdin.
    pub fn spawn(self) -> Result<ReexecChild, ExecError> {
        self.spawn_with(|cmd| {
            cmd.stdin(Stdio::null());
        })
    }

    /// Start the child after letting `configure` adjust the command (stdio, working directory, ...).
    ///
    /// Waiting on the returned [`ReexecChild`] still honors this command's context.
    pub fn spawn_with(self, configure: impl FnOnce(&mut Command)) -> Result<ReexecChild, ExecError> {
        if let Some(err) = self.ctx.err() {
            return Err(err);
        }
        let program = self.resolve_program()?;
        let mut cmd = self.build()?;
        configure(&mut cmd);
        let child = cmd.spawn().map_err(|source| ExecError::Spawn { program, source })?;
        tracing::debug!(pid = child.id(), test = %self.test, "spawned child");
        Ok(ReexecChild {
            child,
            ctx: self.ctx,
            poll_interval: self.poll_interval,
        })
    }

    /// Run the child to completion with inherited stdio and report how it ended.
    pub fn status(self) -> Result<(), ExecError> {
        self.spawn()?.wait()
    }

    /// Run the child to completion, capturing stdout and stderr separately.
    #[tracing::instrument(skip_all, fields(test = %self.test))]
    pub fn output(self) -> SplitOutput {
        let filter = self.filter;
        let test = self.test.clone();
        let started = self.spawn_with(|cmd| {
            cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        });
        let mut child = match started {
            Ok(child) => child,
            Err(err) => {
                return SplitOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    result: Err(err),
                };
            }
        };

        let stdout = child.child.stdout.take().map(drain);
        let stderr = child.child.stderr.take().map(drain);
        let status = child.wait();
        let (stdout, stderr) = match (join_output(stdout), join_output(stderr)) {
            (Ok(stdout), Ok(stderr)) => (stdout, stderr),
            (Err(err), _) | (_, Err(err)) => {
                return SplitOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    result: Err(err),
                };
            }
        };

        let result = status.and_then(|()| {
            if filter.ran_nothing(&stdout) {
                Err(ExecError::NoMatchingTest(test))
            } else {
                Ok(())
            }
        });
        SplitOutput { stdout, stderr, result }
    }

    /// Run the child to completion, collecting stdout and stderr into one stream.
    ///
    /// A non-zero exit is returned as an error next to the output; nothing here panics on the child's behalf.
    #[tracing::instrument(skip_all, fields(test = %self.test))]
    pub fn combined_output(self) -> Captured {
        let filter = self.filter;
        let test = self.test.clone();
        let ctx = self.ctx.clone();
        let poll_interval = self.poll_interval;

        if let Some(err) = ctx.err() {
            return Captured {
                output: String::new(),
                result: Err(err),
            };
        }

        let (mut child, reader) = match self.spawn_with_shared_pipe() {
            Ok(started) => started,
            Err(err) => {
                return Captured {
                    output: String::new(),
                    result: Err(err),
                };
            }
        };
        tracing::debug!(pid = child.id(), "spawned child");

        let status = wait_with_context(&mut child, &ctx, poll_interval);
        let output = match join_output(Some(reader)) {
            Ok(output) => output,
            Err(err) => {
                return Captured {
                    output: String::new(),
                    result: Err(err),
                };
            }
        };

        let result = status.and_then(status_result).and_then(|()| {
            if filter.ran_nothing(&output) {
                Err(ExecError::NoMatchingTest(test))
            } else {
                Ok(())
            }
        });
        tracing::debug!(ok = result.is_ok(), output_len = output.len(), "child finished");
        Captured { output, result }
    }

    fn build(&self) -> Result<Command, ExecError> {
        let mut cmd = Command::new(self.resolve_program()?);
        cmd.args(&self.args).envs(self.envs.iter().map(|(k, v)| (k, v)));
        Ok(cmd)
    }

    fn resolve_program(&self) -> Result<PathBuf, ExecError> {
        if let Some(program) = &self.program {
            return Ok(program.clone());
        }
        current_exe()
    }

    fn spawn_with_shared_pipe(self) -> Result<(Child, OutputReader), ExecError> {
        let program = self.resolve_program()?;
        let (reader, writer) = io::pipe()?;

        let mut cmd = self.build()?;
        cmd.stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        let child = cmd.spawn().map_err(|source| ExecError::Spawn { program, source })?;
        // The command still owns the parent's write ends; the reader only sees EOF once they are gone.
        drop(cmd);

        Ok((child, drain(reader)))
    }
}

/// A started child whose waiting honors the [`Context`] it was invoked with.
#[derive(Debug)]
pub struct ReexecChild {
    child: Child,
    ctx: Context,
    poll_interval: Duration,
}

impl ReexecChild {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The child's stdout, if it was configured as piped. Can only be taken once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// The child's stderr, if it was configured as piped. Can only be taken once.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    /// Wait for the child to exit, killing it as soon as the context is done.
    pub fn wait(mut self) -> Result<(), ExecError> {
        wait_with_context(&mut self.child, &self.ctx, self.poll_interval).and_then(status_result)
    }
}

/// Output and termination of a finished child, with stdout and stderr kept apart.
#[derive(Debug)]
pub struct SplitOutput {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<(), ExecError>,
}

impl SplitOutput {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// `Some(0)` on success, the child's code if it exited non-zero, `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match &self.result {
            Ok(()) => Some(0),
            Err(err) => err.exit_code(),
        }
    }
}

type OutputReader = thread::JoinHandle<io::Result<Vec<u8>>>;

fn drain(mut pipe: impl Read + Send + 'static) -> OutputReader {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_output(reader: Option<OutputReader>) -> Result<String, ExecError> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    match reader.join() {
        Ok(Ok(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(io::Error::other("output reader thread panicked").into()),
    }
}

fn current_exe() -> Result<PathBuf, ExecError> {
    match std::env::current_exe() {
        Ok(path) => Ok(path),
        Err(err) => std::env::args_os()
            .next()
            .map(|argv0: OsString| PathBuf::from(argv0))
            .ok_or(ExecError::CurrentExe(err)),
    }
}

/// Wait for `child`, killing it as soon as `ctx` is done.
fn wait_with_context(child: &mut Child, ctx: &Context, poll_interval: Duration) -> Result<ExitStatus, ExecError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if let Some(err) = ctx.err() {
            tracing::debug!(pid = child.id(), reason = %err, "killing child");
            // The child may have exited between try_wait and kill; reaping below covers both cases.
            let _ = child.kill();
            child.wait()?;
            return Err(err);
        }
        let nap = match ctx.remaining() {
            Some(left) => poll_interval.min(left).max(Duration::from_millis(1)),
            None => poll_interval,
        };
        thread::sleep(nap);
    }
}

fn status_result(status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ExecError::Exit(code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExecError::Signaled(signal));
        }
    }
    Err(ExecError::Exit(-1))
}
