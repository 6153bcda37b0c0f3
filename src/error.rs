//! Error types for gpu-host-bootstrap

use thiserror::Error;

/// Main error type for bootstrap operations
///
/// Every variant is fatal for the current run. Control signals such as
/// "reboot required" or "already satisfied" are not errors and live in
/// [`crate::stages::StageOutcome`] and [`crate::orchestrator::RunOutcome`].
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The OS package manager exited non-zero for a required package
    #[error("Package installation failed for [{packages}]:\n{stderr}")]
    PackageInstall { packages: String, stderr: String },

    /// A required third-party artifact could not be fetched
    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// Any other external tool exited non-zero or could not be spawned
    #[error("Command `{command}` failed (status {status}):\n{stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BootstrapError {
    /// Create a package installation error
    pub fn package_install(packages: &[String], stderr: impl Into<String>) -> Self {
        Self::PackageInstall {
            packages: packages.join(" "),
            stderr: stderr.into(),
        }
    }

    /// Create a download error
    pub fn download(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Download {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a command error from a rendered command line
    pub fn command(
        command: impl Into<String>,
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Command {
            command: command.into(),
            status: status.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stderr: stderr.into(),
        }
    }

    /// Whether this error came from the package manager
    pub fn is_package_install(&self) -> bool {
        matches!(self, Self::PackageInstall { .. })
    }

    /// Whether this error came from a failed download
    pub fn is_download(&self) -> bool {
        matches!(self, Self::Download { .. })
    }
}

impl From<minijinja::Error> for BootstrapError {
    fn from(err: minijinja::Error) -> Self {
        Self::Template(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_install_message_keeps_stderr() {
        let err = BootstrapError::package_install(
            &["docker.io".to_string(), "curl".to_string()],
            "E: Unable to locate package docker.io",
        );
        assert!(err.is_package_install());
        let msg = err.to_string();
        assert!(msg.contains("docker.io curl"));
        assert!(msg.ends_with("E: Unable to locate package docker.io"));
    }

    #[test]
    fn test_command_status_without_code() {
        let err = BootstrapError::command("usermod -aG docker alice", None, "killed");
        assert!(err.to_string().contains("status signal"));
    }
}
