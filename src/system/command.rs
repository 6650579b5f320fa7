//! Command execution abstraction and the real process-backed runner.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Converts a non-zero exit into [`CommandError::Failure`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failure`] when the exit code is anything other
    /// than zero, including a missing exit code.
    pub fn into_success(self, program: &str) -> Result<Self, CommandError> {
        if self.is_success() {
            return Ok(self);
        }

        let status_text = self
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(CommandError::Failure {
            program: program.to_owned(),
            status: self.code,
            status_text,
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Errors surfaced while running host commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Failure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started. A
    /// non-zero exit is reported through [`CommandOutput::code`], not as an
    /// error.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;

    /// Runs `program` and fails unless it exits with status zero.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command cannot be spawned or exits
    /// unsuccessfully.
    fn run_checked(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.run(program, args)?.into_success(program)
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        debug!(program, ?args, "running host command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Collects string-like arguments into the owned form expected by
/// [`CommandRunner::run`].
#[must_use]
pub fn os_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| OsString::from(arg.as_ref()))
        .collect()
}
