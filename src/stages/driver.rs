//! Driver stage - GPU driver autodetect and install
//!
//! The kernel module only loads after a reboot, so this is the reboot
//! boundary of the bootstrap.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::Stage;
use crate::BootstrapError;
use crate::config::DriverConfig;
use crate::context::RunContext;
use crate::host::CommandRunner;

pub struct GpuDriver {
    config: DriverConfig,
    runner: Arc<dyn CommandRunner>,
}

impl GpuDriver {
    pub fn new(config: DriverConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }
}

#[async_trait]
impl Stage for GpuDriver {
    fn id(&self) -> &'static str {
        "gpu-driver"
    }

    fn label(&self) -> &'static str {
        "GPU driver"
    }

    fn requires_reboot(&self) -> bool {
        true
    }

    async fn is_satisfied(&self, ctx: &RunContext) -> Result<bool, BootstrapError> {
        if self.config.module_version_file.exists() {
            debug!(
                "Driver module loaded ({} present)",
                self.config.module_version_file.display()
            );
            return Ok(true);
        }

        let Some(probe) = ctx.command_argv(&self.config.probe_command) else {
            return Ok(false);
        };
        if !self.runner.command_exists(&probe.program).await {
            return Ok(false);
        }
        Ok(self.runner.run(&probe).await?.success())
    }

    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let spec = ctx
            .command_argv(&self.config.install_command)
            .ok_or_else(|| BootstrapError::Config("driver.install_command is empty".to_string()))?;

        info!("Installing GPU driver via `{}`", spec.display());
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }
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

    fn config(temp: &TempDir) -> DriverConfig {
        DriverConfig {
            module_version_file: temp.path().join("nvidia/version"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_satisfied_when_module_loaded() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        std::fs::create_dir_all(temp.path().join("nvidia")).unwrap();
        std::fs::write(&config.module_version_file, "NVRM version: 550.54").unwrap();

        let runner = Arc::new(MockRunner::new());
        let stage = GpuDriver::new(config, runner.clone());
        assert!(stage.is_satisfied(&ctx()).await.unwrap());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_not_satisfied_without_probe_tool() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new().with_missing_program("nvidia-smi"));
        let stage = GpuDriver::new(config(&temp), runner.clone());
        assert!(!stage.is_satisfied(&ctx()).await.unwrap());
        assert!(runner.actions().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_means_not_satisfied() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new().with_failure(
            "nvidia-smi",
            9,
            "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver",
        ));
        let stage = GpuDriver::new(config(&temp), runner);
        assert!(!stage.is_satisfied(&ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_runs_installer() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        let stage = GpuDriver::new(config(&temp), runner.clone());
        stage.apply(&ctx()).await.unwrap();
        assert_eq!(runner.calls(), vec!["ubuntu-drivers autoinstall"]);
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_diagnostics() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new().with_failure(
            "ubuntu-drivers",
            1,
            "ERROR: no drivers found",
        ));
        let stage = GpuDriver::new(config(&temp), runner);
        let err = stage.apply(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("ERROR: no drivers found"));
    }
}
