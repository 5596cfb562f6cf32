//! Invoking package manager lifecycle commands.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// A package-level command run through the package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCommand {
    /// Install the package's external dependencies.
    Install,
    /// Run the package's `build` script.
    Build,
    /// Run an arbitrary script of the package.
    Script(String),
}

impl LifecycleCommand {
    /// Arguments passed to the package manager.
    #[must_use]
    pub fn args(&self) -> Vec<&str> {
        match self {
            Self::Install => vec!["install", "--no-audit"],
            Self::Build => vec!["run", "build"],
            Self::Script(script) => vec!["run", script.as_str()],
        }
    }
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Build => write!(f, "run build"),
            Self::Script(script) => write!(f, "run {script}"),
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Errors that can occur when running a lifecycle command.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start `{program}` in {}: {source}", .dir.display())]
    Spawn {
        program: String,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed in {} ({})", .dir.display(), describe_exit(.code))]
    Failed {
        command: String,
        dir: PathBuf,
        code: Option<i32>,
        output: CommandOutput,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl RunError {
    /// Output captured before the failure, if the command ran at all.
    #[must_use]
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::Spawn { .. } => None,
            Self::Failed { output, .. } => Some(output),
        }
    }
}

/// Runs a lifecycle command in a package directory and waits for it to exit.
///
/// Implementations must not return before the command has finished; callers
/// rely on each step completing before the next one starts.
pub trait CommandRunner {
    /// Run `command` with `dir` as working directory.
    fn run(&mut self, dir: &Path, command: &LifecycleCommand) -> Result<CommandOutput, RunError>;
}

/// Runs commands through an npm-compatible client (`npm`, `pnpm`, ...).
#[derive(Debug, Clone)]
pub struct NpmRunner {
    client: String,
}

impl NpmRunner {
    /// Create a runner for the given client executable.
    #[must_use]
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }
}

impl CommandRunner for NpmRunner {
    fn run(&mut self, dir: &Path, command: &LifecycleCommand) -> Result<CommandOutput, RunError> {
        debug!(client = %self.client, %command, dir = %dir.display(), "running");

        let output = Command::new(&self.client)
            .args(command.args())
            .current_dir(dir)
            .output()
            .map_err(|source| RunError::Spawn {
                program: self.client.clone(),
                dir: dir.to_path_buf(),
                source,
            })?;

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(RunError::Failed {
                command: format!("{} {command}", self.client),
                dir: dir.to_path_buf(),
                code: output.status.code(),
                output: captured,
            });
        }

        Ok(captured)
    }
}
