//! Host command execution
//!
//! Every external tool the stages drive (apt-get, dpkg, systemctl, usermod,
//! python) goes through [`CommandRunner`], so stage logic can be exercised
//! against [`mock::MockRunner`] without touching the host.

pub mod mock;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::BootstrapError;

/// A command to run, with the environment it should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build a spec from an argv-style list (first element is the program)
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program.as_str()).args(rest.iter().cloned()))
    }

    /// Render as a shell-like line for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into a [`BootstrapError::Command`]
    pub fn check(self, spec: &CommandSpec) -> Result<Self, BootstrapError> {
        if self.success() {
            Ok(self)
        } else {
            Err(BootstrapError::command(
                spec.display(),
                self.status,
                self.stderr,
            ))
        }
    }
}

/// Runs external commands on behalf of stages
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    ///
    /// A non-zero exit is not an error at this level; only failing to spawn
    /// the process is.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BootstrapError>;

    /// Check whether a program is resolvable on PATH
    async fn command_exists(&self, program: &str) -> bool {
        let probe = CommandSpec::new("sh")
            .arg("-c")
            .arg(format!("command -v {program}"));
        self.run(&probe).await.is_ok_and(|o| o.success())
    }
}

/// Runs commands on the real host via `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BootstrapError> {
        debug!("Running: {}", spec.display());

        let output = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output()
            .await
            .map_err(|e| BootstrapError::command(spec.display(), None, e.to_string()))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.stdout.is_empty() {
            debug!("stdout: {}", result.stdout.trim_end());
        }

        Ok(result)
    }
}
