//! Container runtime stage - runtime, GPU shim, runtime restart

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::Stage;
use crate::BootstrapError;
use crate::config::RuntimeConfig;
use crate::context::RunContext;
use crate::host::CommandRunner;
use crate::modules::download::Fetcher;
use crate::modules::packages::{Apt, signed_sources};
use crate::modules::runtime_config::{has_runtime, live_runtimes};
use crate::state::write_atomic;

pub struct ContainerRuntime {
    config: RuntimeConfig,
    runner: Arc<dyn CommandRunner>,
    fetcher: Fetcher,
}

impl ContainerRuntime {
    pub fn new(config: RuntimeConfig, runner: Arc<dyn CommandRunner>, fetcher: Fetcher) -> Self {
        Self {
            config,
            runner,
            fetcher,
        }
    }

    /// Register the shim's signed apt repository and install the shim
    async fn install_shim(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let key = self.fetcher.fetch(&self.config.shim_key_url).await?;
        let list = self.fetcher.fetch_text(&self.config.shim_list_url).await?;

        write_atomic(&self.config.keyring_path, &key).await?;
        let sources = signed_sources(&list, &self.config.keyring_path);
        write_atomic(&self.config.sources_path, sources.as_bytes()).await?;
        info!(
            "Registered repository {} (key {})",
            self.config.sources_path.display(),
            self.config.keyring_path.display()
        );

        let apt = Apt::new(self.runner.as_ref(), ctx);
        apt.update().await?;
        apt.install(std::slice::from_ref(&self.config.shim_package))
            .await
    }

    async fn configure_shim(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let spec = ctx.command(&self.config.shim_command).args([
            "runtime".to_string(),
            "configure".to_string(),
            format!("--runtime={}", self.config.runtime_command),
        ]);
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    async fn restart_runtime(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        info!("Restarting {}", self.config.service);
        let spec = ctx
            .command("systemctl")
            .args(["restart", self.config.service.as_str()]);
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }
}

#[async_trait]
impl Stage for ContainerRuntime {
    fn id(&self) -> &'static str {
        "container-runtime"
    }

    fn label(&self) -> &'static str {
        "Container runtime and GPU shim"
    }

    async fn is_satisfied(&self, ctx: &RunContext) -> Result<bool, BootstrapError> {
        if !self.runner.command_exists(&self.config.runtime_command).await {
            debug!("{} not on PATH", self.config.runtime_command);
            return Ok(false);
        }
        if !self.runner.command_exists(&self.config.shim_command).await {
            debug!("{} not on PATH", self.config.shim_command);
            return Ok(false);
        }

        // The daemon config alone is not enough: it only takes effect after
        // the restart, which is the last step of apply
        let loaded = live_runtimes(self.runner.as_ref(), ctx, &self.config.runtime_command)
            .await?
            .iter()
            .any(|name| name == &self.config.shim_runtime_name);
        if !loaded {
            debug!(
                "{} daemon has not loaded the {} runtime",
                self.config.runtime_command, self.config.shim_runtime_name
            );
        }
        Ok(loaded)
    }

    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        if !self.runner.command_exists(&self.config.runtime_command).await {
            Apt::new(self.runner.as_ref(), ctx)
                .install(&self.config.packages)
                .await?;
        }

        if !self.runner.command_exists(&self.config.shim_command).await {
            self.install_shim(ctx).await?;
        }

        if !has_runtime(&self.config.daemon_config, &self.config.shim_runtime_name).await? {
            self.configure_shim(ctx).await?;
        }

        self.restart_runtime(ctx).await
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

    fn config(temp: &TempDir) -> RuntimeConfig {
        RuntimeConfig {
            keyring_path: temp.path().join("keyrings/shim.asc"),
            sources_path: temp.path().join("sources.list.d/shim.list"),
            daemon_config: temp.path().join("docker/daemon.json"),
            shim_key_url: "http://127.0.0.1:9/gpgkey".to_string(),
            shim_list_url: "http://127.0.0.1:9/shim.list".to_string(),
            ..Default::default()
        }
    }

    fn register_runtime(config: &RuntimeConfig) {
        std::fs::create_dir_all(config.daemon_config.parent().unwrap()).unwrap();
        std::fs::write(
            &config.daemon_config,
            r#"{"runtimes": {"nvidia": {"path": "nvidia-container-runtime"}}}"#,
        )
        .unwrap();
    }

    const LOADED: &str = r#"{"io.containerd.runc.v2":{"path":"runc"},"nvidia":{"path":"nvidia-container-runtime"}}"#;
    const NOT_LOADED: &str = r#"{"io.containerd.runc.v2":{"path":"runc"}}"#;

    #[tokio::test]
    async fn test_satisfied() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        register_runtime(&config);

        let runner = Arc::new(MockRunner::new().with_stdout("docker info", LOADED));
        let stage = ContainerRuntime::new(config, runner, Fetcher::new().unwrap());
        assert!(stage.is_satisfied(&ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_registered_but_not_loaded() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        register_runtime(&config);

        let runner = Arc::new(MockRunner::new().with_stdout("docker info", NOT_LOADED));
        let stage = ContainerRuntime::new(config, runner, Fetcher::new().unwrap());
        assert!(!stage.is_satisfied(&ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_restart_is_retried() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let runner = Arc::new(
            MockRunner::new()
                .with_failure_once("systemctl restart", 1, "Job for docker.service failed")
                .with_stdout("docker info", LOADED)
                .with_stdout_once("docker info", NOT_LOADED),
        );
        let stage = ContainerRuntime::new(config.clone(), runner.clone(), Fetcher::new().unwrap());

        let err = stage.apply(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("systemctl restart docker"));
        // What the shim's configure step leaves behind
        register_runtime(&config);

        assert!(!stage.is_satisfied(&ctx()).await.unwrap());
        stage.apply(&ctx()).await.unwrap();
        assert!(stage.is_satisfied(&ctx()).await.unwrap());

        let calls = runner.calls();
        let count = |line: &str| calls.iter().filter(|c| c.as_str() == line).count();
        assert_eq!(count("nvidia-ctk runtime configure --runtime=docker"), 1);
        assert_eq!(count("systemctl restart docker"), 2);
    }

    #[tokio::test]
    async fn test_not_satisfied_without_registration() {
        let temp = TempDir::new().unwrap();
        let stage = ContainerRuntime::new(
            config(&temp),
            Arc::new(MockRunner::new()),
            Fetcher::new().unwrap(),
        );
        assert!(!stage.is_satisfied(&ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_configures_and_restarts() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new());
        let stage = ContainerRuntime::new(config(&temp), runner.clone(), Fetcher::new().unwrap());

        stage.apply(&ctx()).await.unwrap();
        assert_eq!(
            runner.actions(),
            vec![
                "nvidia-ctk runtime configure --runtime=docker",
                "systemctl restart docker",
            ]
        );
    }

    #[tokio::test]
    async fn test_runtime_install_failure() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(
            MockRunner::new()
                .with_missing_program("docker")
                .with_failure("apt-get install", 100, "E: Package 'docker.io' has no installation candidate"),
        );
        let stage = ContainerRuntime::new(config(&temp), runner.clone(), Fetcher::new().unwrap());

        let err = stage.apply(&ctx()).await.unwrap_err();
        assert!(err.is_package_install());
        assert!(!runner.ran("systemctl"));
    }

    #[tokio::test]
    async fn test_shim_download_failure() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(MockRunner::new().with_missing_program("nvidia-ctk"));
        let stage = ContainerRuntime::new(config(&temp), runner.clone(), Fetcher::new().unwrap());

        let err = stage.apply(&ctx()).await.unwrap_err();
        assert!(err.is_download());
        assert!(runner.actions().is_empty());
        assert!(!temp.path().join("sources.list.d/shim.list").exists());
    }
}
