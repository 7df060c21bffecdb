//! gpg subprocess plumbing.
//!
//! Every invocation gets the same hardened baseline: no options file, no
//! default keyring, no prompts, no warnings that could interleave with the
//! machine-readable output. The child always runs with `GNUPGHOME` pointing
//! at the process trust-store session.
//!
//! Pipe ends are owned by [`Channel`]; the parent end of each pipe is dropped
//! as soon as it is consumed, and child ends never leak into the parent
//! because std spawns with close-on-exec descriptors.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::ops::ControlFlow;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{GpgError, GpgResult};
use crate::trust::{TrustStoreSession, GNUPGHOME};
use crate::types::GpgConfig;

/// Flags passed to every gpg invocation.
pub const BASELINE_ARGS: &[&str] = &[
    "--no-options",
    "--no-default-keyring",
    "--batch",
    "--no-secmem-warning",
    "--no-permission-warning",
    "--no-mdc-warning",
    "--no-auto-check-trustdb",
];

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with status zero.
    Success,

    /// Normal exit with a non-zero status.
    Failure(i32),

    /// Terminated by a signal.
    Signaled(i32),
}

impl ExitOutcome {
    pub fn success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => Self::Success,
            (Some(code), _) => Self::Failure(code),
            (None, Some(signo)) => Self::Signaled(signo),
            // Stopped/continued children are not reaped by wait(); treat the
            // impossible remainder as a failure.
            (None, None) => Self::Failure(-1),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exited normally"),
            Self::Failure(code) => write!(f, "returned error exit status {}", code),
            Self::Signaled(signo) => write!(f, "was killed by signal {}", signo),
        }
    }
}

/// Child standard input.
#[derive(Debug)]
pub enum Stdin {
    /// `/dev/null`.
    Null,

    /// A pipe the caller writes through [`Channel`].
    Pipe,

    /// A caller-supplied file.
    File(File),
}

/// Child standard output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdout {
    /// `/dev/null`.
    Null,

    /// Shared with the parent.
    Inherit,

    /// A pipe the caller reads line by line through [`Channel`].
    Pipe,
}

/// The gpg executable plus the stream policy derived from configuration.
#[derive(Debug, Clone)]
pub struct GpgCommand {
    program: String,
    verbose: bool,
}

impl GpgCommand {
    pub fn new(program: impl Into<String>, verbose: bool) -> Self {
        Self {
            program: program.into(),
            verbose,
        }
    }

    pub fn from_config(config: &GpgConfig) -> Self {
        Self::new(config.program.clone(), config.verbose)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Start building one invocation. `step` names it in errors and traces.
    pub fn invocation(&self, step: &'static str) -> Invocation<'_> {
        Invocation {
            command: self,
            step,
            args: Vec::new(),
            stdin: Stdin::Null,
            stdout: Stdout::Null,
        }
    }
}

/// One gpg invocation being assembled.
#[derive(Debug)]
pub struct Invocation<'a> {
    command: &'a GpgCommand,
    step: &'static str,
    args: Vec<std::ffi::OsString>,
    stdin: Stdin,
    stdout: Stdout,
}

impl Invocation<'_> {
    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn stdin(mut self, stdin: Stdin) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, stdout: Stdout) -> Self {
        self.stdout = stdout;
        self
    }

    /// Full argument vector, baseline first.
    pub fn argv(&self) -> Vec<std::ffi::OsString> {
        BASELINE_ARGS
            .iter()
            .map(std::ffi::OsString::from)
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Spawn the child inside the trust-store session.
    pub fn spawn(self, session: &TrustStoreSession) -> GpgResult<Channel> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(self.argv())
            .env(GNUPGHOME, session.path())
            .stdin(match self.stdin {
                Stdin::Null => Stdio::null(),
                Stdin::Pipe => Stdio::piped(),
                Stdin::File(file) => Stdio::from(file),
            })
            .stdout(match self.stdout {
                Stdout::Null => Stdio::null(),
                Stdout::Inherit => Stdio::inherit(),
                Stdout::Pipe => Stdio::piped(),
            })
            .stderr(if self.command.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            });

        debug!(
            step = self.step,
            program = %self.command.program,
            args = ?self.args,
            "spawning gpg"
        );

        let child = cmd.spawn().map_err(|source| GpgError::Spawn {
            program: self.command.program.clone(),
            step: self.step,
            source,
        })?;

        Ok(Channel {
            child,
            step: self.step,
            program: self.command.program.clone(),
        })
    }
}

/// A running gpg child and the parent ends of its pipes.
#[derive(Debug)]
pub struct Channel {
    child: Child,
    step: &'static str,
    program: String,
}

impl Channel {
    pub fn step(&self) -> &'static str {
        self.step
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the write end of the child's stdin pipe.
    pub fn take_stdin(&mut self) -> GpgResult<ChildStdin> {
        self.child.stdin.take().ok_or(GpgError::Pipe {
            step: self.step,
            stream: "stdin",
        })
    }

    /// Feed stdout lines (without the line terminator) to `on_line` until
    /// it breaks, then drain the rest so the child never blocks on a full
    /// pipe. Invalid UTF-8 is replaced rather than rejected.
    pub fn read_lines<F>(&mut self, mut on_line: F) -> GpgResult<()>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let stdout = self.child.stdout.take().ok_or(GpgError::Pipe {
            step: self.step,
            stream: "stdout",
        })?;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut done = false;

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf).map_err(|e| {
                GpgError::io(self.step, format!("error reading from {}", self.program), e)
            })?;
            if n == 0 {
                break;
            }
            if done {
                continue;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if on_line(line).is_break() {
                done = true;
            }
        }
        Ok(())
    }

    /// Copy exactly `len` bytes of `input` to the child's stdin on a scoped
    /// thread while `on_line` consumes stdout.
    pub fn feed_and_read_lines<R, F>(&mut self, input: R, len: u64, on_line: F) -> GpgResult<()>
    where
        R: Read + Send,
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let mut stdin = self.take_stdin()?;
        let step = self.step;

        std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> GpgResult<()> {
                let copied = io::copy(&mut input.take(len), &mut stdin)
                    .map_err(|e| GpgError::io(step, "error writing signature", e))?;
                // Closing stdin is what lets gpg see end of input.
                drop(stdin);
                if copied != len {
                    return Err(GpgError::ShortSignature {
                        step,
                        expected: len,
                        copied,
                    });
                }
                Ok(())
            });

            let read = self.read_lines(on_line);
            let written = writer
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            written.and(read)
        })
    }

    /// Close remaining pipe ends and wait for the child.
    pub fn finish(self) -> GpgResult<ExitOutcome> {
        self.finish_within(None)
    }

    /// Like [`Channel::finish`], killing the child once `timeout` elapses.
    pub fn finish_within(mut self, timeout: Option<Duration>) -> GpgResult<ExitOutcome> {
        drop(self.child.stdin.take());
        drop(self.child.stdout.take());

        let status = match timeout {
            None => self.child.wait(),
            Some(timeout) => self.wait_timeout(timeout),
        }
        .map_err(|e| GpgError::io(self.step, format!("error waiting for {}", self.program), e))?;

        let outcome = ExitOutcome::from(status);
        debug!(step = self.step, program = %self.program, %outcome, "gpg finished");
        Ok(outcome)
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() >= timeout {
                warn!(
                    step = self.step,
                    program = %self.program,
                    timeout_secs = timeout.as_secs(),
                    "gpg timed out, killing it"
                );
                // The child may exit between try_wait and kill.
                if let Err(e) = self.child.kill() {
                    if e.kind() != io::ErrorKind::InvalidInput {
                        return Err(e);
                    }
                }
                return self.child.wait();
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Reap on early-error paths so no zombie outlives the call.
        if let Ok(None) = self.child.try_wait() {
            drop(self.child.stdin.take());
            drop(self.child.stdout.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_outcome_from_status() {
        assert_eq!(ExitOutcome::from(ExitStatus::from_raw(0)), ExitOutcome::Success);
        // wait(2) encoding: exit code in the high byte, signal in the low bits.
        assert_eq!(
            ExitOutcome::from(ExitStatus::from_raw(2 << 8)),
            ExitOutcome::Failure(2)
        );
        assert_eq!(
            ExitOutcome::from(ExitStatus::from_raw(9)),
            ExitOutcome::Signaled(9)
        );
    }

    #[test]
    fn test_exit_outcome_display() {
        assert_eq!(ExitOutcome::Success.to_string(), "exited normally");
        assert_eq!(
            ExitOutcome::Failure(1).to_string(),
            "returned error exit status 1"
        );
        assert_eq!(
            ExitOutcome::Signaled(15).to_string(),
            "was killed by signal 15"
        );
        assert!(!ExitOutcome::Signaled(15).success());
    }

    #[test]
    fn test_argv_baseline_first() {
        let command = GpgCommand::new("gpg", false);
        let argv = command
            .invocation("list-keys")
            .args(["--with-colons", "--show-keys"])
            .argv();
        assert_eq!(argv.len(), BASELINE_ARGS.len() + 2);
        assert_eq!(argv[0], "--no-options");
        assert!(argv.iter().any(|a| a == "--batch"));
        assert!(argv.iter().any(|a| a == "--no-default-keyring"));
        assert_eq!(argv[BASELINE_ARGS.len()], "--with-colons");
    }

    #[test]
    fn test_from_config() {
        let config = GpgConfig::default()
            .with_program("/usr/bin/gpg2")
            .with_verbose(true);
        let command = GpgCommand::from_config(&config);
        assert_eq!(command.program(), "/usr/bin/gpg2");
        assert!(command.verbose());
    }
}
