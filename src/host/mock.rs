//! Mock command runner for testing
//!
//! Records every command it is asked to run and answers from a table of
//! canned responses keyed by command-line prefix.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::BootstrapError;

struct Rule {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

/// Mock runner for testing
///
/// # Example
/// ```
/// use gpu_host_bootstrap::host::mock::MockRunner;
///
/// let runner = MockRunner::new()
///     .with_failure("apt-get install", 100, "E: Unable to locate package")
///     .with_missing_program("nvcc");
/// ```
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl MockRunner {
    /// Create a runner where every command succeeds with empty output
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, prefix: &str, output: CommandOutput, once: bool) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                prefix: prefix.to_string(),
                output,
                once,
            });
        self
    }

    /// Answer commands starting with `prefix` with a successful stdout
    pub fn with_stdout(self, prefix: &str, stdout: &str) -> Self {
        let output = CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        self.push(prefix, output, false)
    }

    /// Answer commands starting with `prefix` with a non-zero exit
    pub fn with_failure(self, prefix: &str, status: i32, stderr: &str) -> Self {
        let output = CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        };
        self.push(prefix, output, false)
    }

    /// Like [`with_failure`](Self::with_failure) but only for the next match
    pub fn with_failure_once(self, prefix: &str, status: i32, stderr: &str) -> Self {
        let output = CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        };
        self.push(prefix, output, true)
    }

    /// Like [`with_stdout`](Self::with_stdout) but only for the next match
    pub fn with_stdout_once(self, prefix: &str, stdout: &str) -> Self {
        let output = CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        self.push(prefix, output, true)
    }

    /// Answer commands starting with `prefix` with a full output
    pub fn with_output(self, prefix: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        let output = CommandOutput {
            status: Some(status),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        self.push(prefix, output, false)
    }

    /// Make `command -v <program>` fail
    pub fn with_missing_program(self, program: &str) -> Self {
        self.with_failure(&format!("sh -c command -v {program}"), 1, "")
    }

    /// Rendered command lines in the order they ran
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    /// Whether any recorded command starts with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    /// Recorded commands that are not `command -v` probes
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("sh -c command -v"))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BootstrapError> {
        let line = spec.display();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());

        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());

        // One-shot rules win, then the most recently added persistent rule
        if let Some(pos) = rules
            .iter()
            .position(|r| r.once && line.starts_with(&r.prefix))
        {
            return Ok(rules.remove(pos).output);
        }
        if let Some(rule) = rules
            .iter()
            .rev()
            .find(|r| !r.once && line.starts_with(&r.prefix))
        {
            return Ok(rule.output.clone());
        }

        Ok(CommandOutput {
            status: Some(0),
            ..Default::default()
        })
    }
}
