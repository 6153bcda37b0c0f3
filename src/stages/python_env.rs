//! Python stage - isolated interpreter environment with numeric/ML libraries

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use super::Stage;
use crate::BootstrapError;
use crate::config::PythonConfig;
use crate::context::RunContext;
use crate::host::{CommandRunner, CommandSpec};
use crate::modules::groups;

pub struct PythonEnv {
    config: PythonConfig,
    runner: Arc<dyn CommandRunner>,
}

impl PythonEnv {
    pub fn new(config: PythonConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    fn python(&self) -> PathBuf {
        self.config.venv_path.join("bin").join("python")
    }

    fn pip(&self, ctx: &RunContext) -> CommandSpec {
        ctx.command(&self.python().to_string_lossy())
            .args(["-m", "pip"])
    }

    async fn create(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let venv = self.config.venv_path.to_string_lossy().into_owned();
        let mut spec = ctx.command(&self.config.interpreter).args(["-m", "venv"]);
        // A directory without an interpreter is a broken environment
        if self.config.venv_path.exists() {
            spec = spec.arg("--clear");
        }
        spec = spec.arg(venv);

        info!("Creating Python environment at {}", self.config.venv_path.display());
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    async fn install_libraries(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let upgrade = self.pip(ctx).args(["install", "--upgrade", "pip"]);
        self.runner.run(&upgrade).await?.check(&upgrade)?;

        if self.config.packages.is_empty() {
            return Ok(());
        }

        let mut spec = self.pip(ctx).arg("install");
        if let Some(index) = &self.config.extra_index_url {
            spec = spec.args(["--extra-index-url", index.as_str()]);
        }
        spec = spec.args(self.config.packages.iter().cloned());

        info!("Installing {} Python libraries", self.config.packages.len());
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(BootstrapError::package_install(
                &self.config.packages,
                output.stderr,
            ));
        }
        Ok(())
    }

    async fn hand_over(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let spec = ctx.command("chown").args([
            "-R".to_string(),
            // Empty group: chown uses the user's login group
            format!("{}:", ctx.target_user),
            self.config.venv_path.to_string_lossy().into_owned(),
        ]);
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    async fn owned_by_target(&self, ctx: &RunContext) -> Result<bool, BootstrapError> {
        let Some(owner) = owner_uid(&self.config.venv_path).await? else {
            return Ok(true);
        };
        let uid = groups::user_id(self.runner.as_ref(), ctx, &ctx.target_user).await?;
        if owner != uid {
            debug!(
                "{} owned by uid {}, not {} ({})",
                self.config.venv_path.display(),
                owner,
                ctx.target_user,
                uid
            );
        }
        Ok(owner == uid)
    }
}

#[cfg(unix)]
async fn owner_uid(path: &Path) -> Result<Option<u32>, BootstrapError> {
    use std::os::unix::fs::MetadataExt;
    Ok(Some(fs::metadata(path).await?.uid()))
}

#[cfg(not(unix))]
async fn owner_uid(_path: &Path) -> Result<Option<u32>, BootstrapError> {
    Ok(None)
}

/// Distribution name of a requirement such as `torch==2.3.0` or `uvicorn[standard]`
pub fn requirement_name(requirement: &str) -> &str {
    let end = requirement
        .find(|c: char| "<>=!~[;@ ".contains(c))
        .unwrap_or(requirement.len());
    requirement[..end].trim()
}

#[async_trait]
impl Stage for PythonEnv {
    fn id(&self) -> &'static str {
        "python-env"
    }

    fn label(&self) -> &'static str {
        "Python environment and ML libraries"
    }

    async fn is_satisfied(&self, ctx: &RunContext) -> Result<bool, BootstrapError> {
        if !self.python().exists() {
            debug!("{} not found", self.python().display());
            return Ok(false);
        }
        if !self.owned_by_target(ctx).await? {
            return Ok(false);
        }
        if self.config.packages.is_empty() {
            return Ok(true);
        }

        let spec = self.pip(ctx).arg("show").args(
            self.config
                .packages
                .iter()
                .map(|p| requirement_name(p).to_string()),
        );
        // pip show exits 1 when any requested package is missing
        Ok(self.runner.run(&spec).await?.success())
    }

    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        if !self.python().exists() {
            self.create(ctx).await?;
        }
        self.install_libraries(ctx).await?;
        self.hand_over(ctx).await
    }
}
