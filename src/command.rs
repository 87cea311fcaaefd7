//! Process execution abstraction used for every Azure CLI call.

use std::ffi::OsString;
use std::process::Command;

use shell_escape::unix::escape;
use thiserror::Error;

/// Arguments whose following value must never appear in logs or errors.
const SECRET_FLAGS: [&str; 4] = [
    "--password",
    "--aad-client-secret",
    "--account-key",
    "--settings",
];

/// Placeholder rendered in place of secret argument values.
pub const REDACTED: &str = "<redacted>";

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

    /// Human readable representation of the exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when an external command cannot produce a usable result.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when the process could not be started at all.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error returned by the operating system.
        message: String,
    },
    /// Raised when the process exits with a non-zero or missing status.
    #[error("{command} exited with status {status_text}: {stderr}")]
    Failed {
        /// Redacted rendering of the command line.
        command: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when a successful command prints something that is not JSON.
    #[error("{command} returned unparseable output: {message}")]
    Parse {
        /// Redacted rendering of the command line.
        command: String,
        /// Parser error message.
        message: String,
        /// Raw standard output that failed to parse.
        stdout: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        (**self).run(program, args)
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
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

/// Renders `program args...` as a shell-escaped line with secret values
/// replaced by [`REDACTED`].
#[must_use]
pub fn render_command_line(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    let mut hide_next = false;
    for arg in args {
        let text = arg.to_string_lossy();
        rendered.push(' ');
        if hide_next {
            rendered.push_str(REDACTED);
            hide_next = false;
            continue;
        }
        hide_next = SECRET_FLAGS.contains(&text.as_ref());
        rendered.push_str(escape(text).as_ref());
    }
    rendered
}
