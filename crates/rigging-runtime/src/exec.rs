//! External process execution for the `kubectl`, `helm` and shell adapters.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use rigging_common::error::{Result, RiggingError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Output from an executed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command (-1 when killed by a signal).
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns whether the command exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into `RiggingError::Command`.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Command` carrying the exit code and stderr.
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RiggingError::Command {
                program: program.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// A command line to run.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Starts a command for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feeds `input` on standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Runs the command in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Runs the command to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Io` if the process cannot be spawned or its
    /// pipes fail. A non-zero exit is not an error here; see
    /// [`ExecOutput::check`].
    pub async fn run(&self) -> Result<ExecOutput> {
        tracing::debug!(program = %self.program, args = ?self.args, "running command");
        let io_err = |e: std::io::Error| RiggingError::Io {
            path: PathBuf::from(&self.program),
            source: e,
        };

        let mut command = Command::new(&self.program);
        let _ = command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            let _ = command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(io_err)?;
        if let (Some(input), Some(mut pipe)) = (&self.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(io_err)?;
            drop(pipe);
        }
        let output = child.wait_with_output().await.map_err(io_err)?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Resolves `program` on `PATH` (or checks it if it is a path).
///
/// # Errors
///
/// Returns `RiggingError::NotFound` if the executable does not exist.
pub fn locate(program: &str) -> Result<PathBuf> {
    if Path::new(program).components().count() > 1 {
        let path = PathBuf::from(program);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(RiggingError::NotFound {
                kind: "executable",
                id: program.to_string(),
            })
        };
    }
    which::which(program).map_err(|_| RiggingError::NotFound {
        kind: "executable",
        id: program.to_string(),
    })
}
