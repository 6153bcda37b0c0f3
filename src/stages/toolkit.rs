//! Toolkit stage - GPU compute toolkit and search path registration

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::Stage;
use crate::BootstrapError;
use crate::config::ToolkitConfig;
use crate::context::RunContext;
use crate::host::CommandRunner;
use crate::modules::download::{Fetcher, file_name_from_url};
use crate::modules::packages::Apt;
use crate::modules::profile;

pub struct ComputeToolkit {
    config: ToolkitConfig,
    runner: Arc<dyn CommandRunner>,
    fetcher: Fetcher,
}

impl ComputeToolkit {
    pub fn new(config: ToolkitConfig, runner: Arc<dyn CommandRunner>, fetcher: Fetcher) -> Self {
        Self {
            config,
            runner,
            fetcher,
        }
    }

    fn compiler(&self) -> PathBuf {
        self.config.home.join("bin").join("nvcc")
    }

    fn exports(&self) -> Vec<String> {
        profile::toolkit_exports(&self.config.home)
    }

    /// Register the vendor repository and install the toolkit package
    async fn install(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let url = ctx.render_url(&self.config.keyring_url)?;
        let file = file_name_from_url(&url).unwrap_or("toolkit-keyring.deb");
        let dest = self.config.download_dir.join(file);

        self.fetcher.fetch_to(&url, &dest).await?;

        let apt = Apt::new(self.runner.as_ref(), ctx);
        apt.install_deb(&dest).await?;
        apt.update().await?;
        apt.install(std::slice::from_ref(&self.config.package)).await?;

        info!("Installed {}", self.config.package);
        Ok(())
    }
}

#[async_trait]
impl Stage for ComputeToolkit {
    fn id(&self) -> &'static str {
        "compute-toolkit"
    }

    fn label(&self) -> &'static str {
        "GPU compute toolkit"
    }

    fn contribute_env(&self, ctx: &mut RunContext) {
        let home = self.config.home.display().to_string();
        ctx.prepend_path("PATH", &format!("{home}/bin"));
        ctx.prepend_path("LD_LIBRARY_PATH", &format!("{home}/lib64"));
    }

    async fn is_satisfied(&self, _ctx: &RunContext) -> Result<bool, BootstrapError> {
        if !self.compiler().exists() {
            debug!("{} not found", self.compiler().display());
            return Ok(false);
        }
        let missing = profile::missing_lines(&self.config.profile_path, &self.exports()).await?;
        Ok(missing.is_empty())
    }

    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        // A crash between install and registration leaves the compiler in
        // place; only the registration is redone then.
        if self.compiler().exists() {
            info!("Toolkit already installed at {}", self.config.home.display());
        } else {
            self.install(ctx).await?;
        }

        profile::register(&self.config.profile_path, &self.exports()).await?;
        Ok(())
    }
}
