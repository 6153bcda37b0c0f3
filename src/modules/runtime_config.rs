//! Container runtime daemon configuration

use serde_json::Value;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::BootstrapError;
use crate::context::RunContext;
use crate::host::CommandRunner;

/// Whether the daemon config at `path` declares a runtime called `name`
///
/// A missing file means no runtimes are registered. A malformed file is an
/// error rather than "not registered": the shim's own configure step would
/// refuse to edit it as well.
pub async fn has_runtime(path: &Path, name: &str) -> Result<bool, BootstrapError> {
    if !path.exists() {
        debug!("No daemon config at {}", path.display());
        return Ok(false);
    }

    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(false);
    }

    let config: Value = serde_json::from_str(&content)?;
    Ok(config
        .get("runtimes")
        .and_then(|r| r.get(name))
        .is_some())
}

/// Runtimes the running daemon has actually loaded
///
/// A daemon that is stopped or unreachable reports none, so a daemon config
/// that was written but never picked up by a restart does not count.
pub async fn live_runtimes(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    runtime_command: &str,
) -> Result<Vec<String>, BootstrapError> {
    let spec = ctx
        .command(runtime_command)
        .args(["info", "--format", "{{json .Runtimes}}"]);
    let output = runner.run(&spec).await?;
    if !output.success() {
        debug!("{} daemon not answering: {}", runtime_command, output.stderr.trim());
        return Ok(Vec::new());
    }
    parse_runtimes(&output.stdout)
}

/// Runtime names from the `{{json .Runtimes}}` object
fn parse_runtimes(stdout: &str) -> Result<Vec<String>, BootstrapError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(trimmed)?;
    Ok(value
        .as_object()
        .map(|runtimes| runtimes.keys().cloned().collect())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Distro;
    use crate::host::mock::MockRunner;
    use tempfile::TempDir;

    fn ctx() -> RunContext {
        let distro = Distro::parse_os_release("ID=ubuntu\nVERSION_ID=22.04\n").unwrap();
        RunContext::new("alice", distro, "x86_64")
    }

    #[tokio::test]
    async fn test_has_runtime() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("daemon.json");

        assert!(!has_runtime(&path, "nvidia").await.unwrap());

        fs::write(&path, r#"{"log-driver": "journald"}"#).await.unwrap();
        assert!(!has_runtime(&path, "nvidia").await.unwrap());

        fs::write(
            &path,
            r#"{"runtimes": {"nvidia": {"args": [], "path": "nvidia-container-runtime"}}}"#,
        )
        .await
        .unwrap();
        assert!(has_runtime(&path, "nvidia").await.unwrap());
        assert!(!has_runtime(&path, "runsc").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("daemon.json");
        fs::write(&path, "{runtimes").await.unwrap();

        assert!(matches!(
            has_runtime(&path, "nvidia").await.unwrap_err(),
            BootstrapError::Json(_)
        ));
    }

    #[test]
    fn test_parse_runtimes() {
        let out = r#"{"io.containerd.runc.v2":{"path":"runc"},"nvidia":{"path":"nvidia-container-runtime"}}"#;
        let mut names = parse_runtimes(out).unwrap();
        names.sort();
        assert_eq!(names, vec!["io.containerd.runc.v2", "nvidia"]);
        assert!(parse_runtimes("\n").unwrap().is_empty());
        assert!(parse_runtimes("null").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_runtimes_daemon_down() {
        let runner = MockRunner::new().with_failure(
            "docker info",
            1,
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );
        let names = live_runtimes(&runner, &ctx(), "docker").await.unwrap();
        assert!(names.is_empty());
        assert_eq!(runner.calls(), vec!["docker info --format {{json .Runtimes}}"]);
    }
}
