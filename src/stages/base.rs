//! Base stage - OS package refresh and build tooling

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Stage;
use crate::BootstrapError;
use crate::config::BaseConfig;
use crate::context::RunContext;
use crate::host::CommandRunner;
use crate::modules::packages::Apt;

pub struct BasePackages {
    config: BaseConfig,
    runner: Arc<dyn CommandRunner>,
}

impl BasePackages {
    pub fn new(config: BaseConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }
}

#[async_trait]
impl Stage for BasePackages {
    fn id(&self) -> &'static str {
        "base-packages"
    }

    fn label(&self) -> &'static str {
        "Base packages and build tooling"
    }

    async fn is_satisfied(&self, ctx: &RunContext) -> Result<bool, BootstrapError> {
        let apt = Apt::new(self.runner.as_ref(), ctx);
        Ok(apt.missing(&self.config.packages).await?.is_empty())
    }

    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        let apt = Apt::new(self.runner.as_ref(), ctx);
        apt.update().await?;
        apt.install(&self.config.packages).await?;
        info!("Base packages installed");
        Ok(())
    }
}
